use std::sync::{Arc, OnceLock};
use std::time::Duration;

use function_name::named;
use tokio::time::Instant;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::{EngineError, ProviderError};
use crate::iid::{Iid, encode_name, resolve};
use crate::reconciler::Waiter;
use crate::resources::ResourceType;
use crate::resources::vpc::{SubnetInfo, SubnetRequest, VpcHandler, VpcInfo, VpcRequest, VpcStatus};
use crate::transaction::{Transaction, Unwinder};

pub(crate) async fn resolve_vpc(handler: &Arc<dyn VpcHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_vpc().await?.into_iter().map(|vpc| vpc.iid).collect();
    resolve(ResourceType::Vpc, reference, &candidates)
}

async fn await_vpc_available(
    handler: &Arc<dyn VpcHandler>,
    name: &str,
    iid: &Iid,
    budget: crate::reconciler::PollBudget,
    deadline: Option<Instant>,
) -> Result<(), EngineError> {
    let waiter = Waiter::new(ResourceType::Vpc, name, budget).with_deadline_until(deadline);
    let status = waiter
        .await_terminal(
            || {
                let handler = Arc::clone(handler);
                let iid = Iid::clone(iid);
                async move { handler.get_vpc_status(&iid).await }
            },
            VpcStatus::is_create_terminal,
        )
        .await?;
    if status != VpcStatus::Available {
        return Err(EngineError::new_provider(
            "CreateVPC",
            ResourceType::Vpc,
            name,
            ProviderError::new_from_safe_message(format!("VPC entered terminal status {status}")),
        ));
    }
    Ok(())
}

impl Engine {
    /// Creates a VPC with its subnets as one coordinated sequence: the
    /// shell first, then each subnet in request order. A failure anywhere
    /// unwinds everything already created, subnets before the shell.
    #[named]
    pub async fn create_vpc(
        &self,
        connection_name: &str,
        request: VpcRequest,
        deadline: Option<Duration>,
    ) -> Result<VpcInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        for subnet in &request.subnets {
            validate_name(&subnet.iid.name_id)?;
        }
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Vpc, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.create_vpc_inner(&handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn create_vpc_inner(
        &self,
        handler: &Arc<dyn VpcHandler>,
        request: VpcRequest,
        deadline: Option<Duration>,
    ) -> Result<VpcInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_vpc().await.map_err(Box::new)?;
        if existing.iter().any(|vpc| vpc.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::Vpc,
                name: requested_name,
            }));
        }

        let budget = self.config.budgets.vpc_create;
        let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
        let vpc_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());

        let shell_request = VpcRequest {
            iid: Iid::from_name(&encode_name(&requested_name)),
            subnets: vec![],
            ..request.clone()
        };

        // creation and settling are separate steps: a shell that never
        // becomes Available must still be deleted by its own compensation
        let mut transaction = Transaction::new()
            .with_step(
                "vpc",
                {
                    let handler = handler.clone();
                    let slot = vpc_slot.clone();
                    move || async move {
                        let info = handler.create_vpc(shell_request).await?;
                        let _ = slot.set(info.iid.clone());
                        Ok(())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = vpc_slot.clone();
                    move || async move {
                        match slot.get() {
                            Some(iid) => handler.delete_vpc(iid).await,
                            None => Ok(()),
                        }
                    }
                },
            )
            .with_step(
                "vpc available",
                {
                    let handler = handler.clone();
                    let slot = vpc_slot.clone();
                    let name = requested_name.clone();
                    move || async move {
                        let iid = slot.get().cloned().unwrap_or_default();
                        await_vpc_available(&handler, &name, &iid, budget, overall_deadline).await
                    }
                },
                || async { Ok(()) },
            );

        for subnet in request.subnets {
            let subnet_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());
            let step_name = format!("subnet {}", subnet.iid.name_id);
            let subnet_request = SubnetRequest {
                iid: Iid::from_name(&encode_name(&subnet.iid.name_id)),
                ..subnet
            };
            transaction = transaction.with_step(
                &step_name,
                {
                    let handler = handler.clone();
                    let vpc_slot = vpc_slot.clone();
                    let slot = subnet_slot.clone();
                    move || async move {
                        let vpc_iid = vpc_slot.get().cloned().unwrap_or_default();
                        let info = handler.add_subnet(&vpc_iid, subnet_request).await?;
                        let _ = slot.set(info.iid);
                        Ok(())
                    }
                },
                {
                    let handler = handler.clone();
                    let vpc_slot = vpc_slot.clone();
                    move || async move {
                        let vpc_iid = vpc_slot.get().cloned().unwrap_or_default();
                        match subnet_slot.get() {
                            Some(iid) => handler.remove_subnet(&vpc_iid, iid).await,
                            None => Ok(()),
                        }
                    }
                },
            );
        }

        transaction.commit().await?;

        let driver_iid = vpc_slot.get().cloned().unwrap_or_default();
        let mut info = handler.get_vpc(&driver_iid).await.map_err(Box::new)?;
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        for subnet in &mut info.subnets {
            subnet.iid = stamp(&subnet.iid);
        }
        Ok(info)
    }

    #[named]
    pub async fn list_vpc(&self, connection_name: &str) -> Result<Vec<VpcInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Vpc, "", function_name!());
        let started = call_log::start();
        let result = handler.list_vpc().await.map_err(Box::new).map(|mut vpcs| {
            for vpc in &mut vpcs {
                vpc.iid = stamp(&vpc.iid);
                for subnet in &mut vpc.subnets {
                    subnet.iid = stamp(&subnet.iid);
                }
            }
            vpcs
        });
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_vpc(&self, connection_name: &str, vpc: &Iid) -> Result<VpcInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Vpc, &vpc.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vpc(&handler, vpc).await?;
            let mut info = handler.get_vpc(&resolved).await?;
            info.iid = stamp(&info.iid);
            for subnet in &mut info.subnets {
                subnet.iid = stamp(&subnet.iid);
            }
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Deletes subnets then the shell, the same reverse teardown rollback
    /// uses.
    #[named]
    pub async fn delete_vpc(&self, connection_name: &str, vpc: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Vpc, &vpc.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vpc(&handler, vpc).await?;
            let info = handler.get_vpc(&resolved).await?;

            let mut unwinder = Unwinder::new();
            {
                let handler = handler.clone();
                let shell = info.iid.clone();
                unwinder.register("vpc", move || async move { handler.delete_vpc(&shell).await });
            }
            for subnet in info.subnets {
                let handler = handler.clone();
                let vpc_iid = info.iid.clone();
                let step_name = format!("subnet {}", subnet.iid.display_name());
                unwinder.register(&step_name, move || async move {
                    handler.remove_subnet(&vpc_iid, &subnet.iid).await
                });
            }
            let failures = unwinder.unwind().await;
            match failures.into_iter().next() {
                Some((_, first)) => Err(first),
                None => Ok(()),
            }
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn add_subnet(
        &self,
        connection_name: &str,
        vpc: &Iid,
        subnet: SubnetRequest,
    ) -> Result<SubnetInfo, Box<EngineError>> {
        validate_name(&subnet.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Subnet, &subnet.iid.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vpc(&handler, vpc).await?;
            let requested_name = subnet.iid.name_id.clone();
            let current = handler.get_vpc(&resolved).await?;
            if current.subnets.iter().any(|s| s.iid.display_name() == requested_name) {
                return Err(EngineError::AlreadyExists {
                    resource_type: ResourceType::Subnet,
                    name: requested_name,
                });
            }
            let request = SubnetRequest {
                iid: Iid::from_name(&encode_name(&requested_name)),
                ..subnet
            };
            let mut info = handler.add_subnet(&resolved, request).await?;
            info.iid = Iid::new(&requested_name, &info.iid.system_id);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn remove_subnet(&self, connection_name: &str, vpc: &Iid, subnet: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vpc_handler()?;
        let record = self.record(&bundle, ResourceType::Subnet, &subnet.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vpc(&handler, vpc).await?;
            let current = handler.get_vpc(&resolved).await?;
            let target = current
                .subnets
                .iter()
                .find(|s| {
                    s.iid.system_id == subnet.system_id
                        || (!subnet.name_id.is_empty() && s.iid.display_name() == subnet.name_id)
                })
                .map(|s| s.iid.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Subnet, &subnet.to_string()))?;
            handler.remove_subnet(&resolved, &target).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
