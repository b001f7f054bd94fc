use std::sync::{Arc, OnceLock};
use std::time::Duration;

use function_name::named;
use tokio::time::Instant;
use tracing::warn;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::{EngineError, ProviderError};
use crate::iid::{Iid, encode_name, resolve};
use crate::reconciler::{PollBudget, Waiter};
use crate::resources::ResourceType;
use crate::resources::cluster::{
    ClusterHandler, ClusterInfo, ClusterRequest, ClusterStatus, NodeGroupInfo, NodeGroupRequest, NodeGroupStatus,
};
use crate::transaction::{Transaction, Unwinder, wrap_rollback_failures};

pub(crate) async fn resolve_cluster(handler: &Arc<dyn ClusterHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_cluster().await?.into_iter().map(|cluster| cluster.iid).collect();
    resolve(ResourceType::Cluster, reference, &candidates)
}

async fn await_cluster_active(
    handler: &Arc<dyn ClusterHandler>,
    name: &str,
    iid: &Iid,
    budget: PollBudget,
    deadline: Option<Instant>,
) -> Result<(), EngineError> {
    let waiter = Waiter::new(ResourceType::Cluster, name, budget).with_deadline_until(deadline);
    let status = waiter
        .await_terminal(
            || {
                let handler = Arc::clone(handler);
                let iid = Iid::clone(iid);
                async move { handler.get_cluster_status(&iid).await }
            },
            ClusterStatus::is_create_terminal,
        )
        .await?;
    if status != ClusterStatus::Active {
        return Err(EngineError::new_provider(
            "CreateCluster",
            ResourceType::Cluster,
            name,
            ProviderError::new_from_safe_message(format!("cluster entered terminal status {status}")),
        ));
    }
    Ok(())
}

async fn await_node_group_active(
    handler: &Arc<dyn ClusterHandler>,
    cluster_iid: &Iid,
    group_name: &str,
    group_iid: &Iid,
    budget: PollBudget,
    deadline: Option<Instant>,
) -> Result<(), EngineError> {
    let waiter = Waiter::new(ResourceType::NodeGroup, group_name, budget).with_deadline_until(deadline);
    let status = waiter
        .await_terminal(
            || {
                let handler = Arc::clone(handler);
                let cluster_iid = Iid::clone(cluster_iid);
                let group_iid = Iid::clone(group_iid);
                async move { handler.get_node_group_status(&cluster_iid, &group_iid).await }
            },
            NodeGroupStatus::is_create_terminal,
        )
        .await?;
    if status != NodeGroupStatus::Active {
        return Err(EngineError::new_provider(
            "AddNodeGroup",
            ResourceType::NodeGroup,
            group_name,
            ProviderError::new_from_safe_message(format!("node group entered terminal status {status}")),
        ));
    }
    Ok(())
}

fn validate_node_group(request: &NodeGroupRequest) -> Result<(), EngineError> {
    validate_name(&request.iid.name_id)?;
    if request.min_node_size < 0 || request.max_node_size < request.min_node_size {
        return Err(EngineError::new_validation(format!(
            "node group {} scaling bounds min {} / max {} are inconsistent",
            request.iid.name_id, request.min_node_size, request.max_node_size
        )));
    }
    if request.desired_node_size < request.min_node_size || request.desired_node_size > request.max_node_size {
        return Err(EngineError::new_validation(format!(
            "node group {} desired size {} is outside {}..{}",
            request.iid.name_id, request.desired_node_size, request.min_node_size, request.max_node_size
        )));
    }
    Ok(())
}

fn stamp_cluster(mut info: ClusterInfo) -> ClusterInfo {
    info.iid = stamp(&info.iid);
    info.network.vpc_iid = stamp(&info.network.vpc_iid);
    info.network.subnet_iids = info.network.subnet_iids.iter().map(stamp).collect();
    info.network.security_group_iids = info.network.security_group_iids.iter().map(stamp).collect();
    for group in &mut info.node_groups {
        group.iid = stamp(&group.iid);
    }
    info
}

impl Engine {
    /// Creates the control plane, waits for it to go `Active`, then adds
    /// each node group in order, waiting on each. A failure rolls back the
    /// node groups already added and then the control plane.
    #[named]
    pub async fn create_cluster(
        &self,
        connection_name: &str,
        request: ClusterRequest,
        deadline: Option<Duration>,
    ) -> Result<ClusterInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        for group in &request.node_groups {
            validate_node_group(group)?;
        }
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.create_cluster_inner(&handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn create_cluster_inner(
        &self,
        handler: &Arc<dyn ClusterHandler>,
        request: ClusterRequest,
        deadline: Option<Duration>,
    ) -> Result<ClusterInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_cluster().await.map_err(Box::new)?;
        if existing.iter().any(|cluster| cluster.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::Cluster,
                name: requested_name,
            }));
        }

        let cluster_budget = self.config.budgets.cluster_create;
        let group_budget = self.config.budgets.node_group;
        let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
        let cluster_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());

        let control_plane_request = ClusterRequest {
            iid: Iid::from_name(&encode_name(&requested_name)),
            node_groups: vec![],
            ..request.clone()
        };

        // creation and settling are separate steps: a control plane that
        // never goes Active must still be deleted by its own compensation
        let mut transaction = Transaction::new()
            .with_step(
                "control plane",
                {
                    let handler = handler.clone();
                    let slot = cluster_slot.clone();
                    move || async move {
                        let info = handler.create_cluster(&control_plane_request).await?;
                        let _ = slot.set(info.iid.clone());
                        Ok(())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = cluster_slot.clone();
                    move || async move {
                        match slot.get() {
                            Some(iid) => handler.delete_cluster(iid).await,
                            None => Ok(()),
                        }
                    }
                },
            )
            .with_step(
                "control plane active",
                {
                    let handler = handler.clone();
                    let slot = cluster_slot.clone();
                    let name = requested_name.clone();
                    move || async move {
                        let iid = slot.get().cloned().unwrap_or_default();
                        await_cluster_active(&handler, &name, &iid, cluster_budget, overall_deadline).await
                    }
                },
                || async { Ok(()) },
            );

        for group in request.node_groups {
            let group_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());
            let step_name = format!("node group {}", group.iid.name_id);
            let group_request = NodeGroupRequest {
                iid: Iid::from_name(&encode_name(&group.iid.name_id)),
                ..group.clone()
            };
            let group_name = group.iid.name_id.clone();
            transaction = transaction
                .with_step(
                    &step_name,
                    {
                        let handler = handler.clone();
                        let cluster_slot = cluster_slot.clone();
                        let slot = group_slot.clone();
                        move || async move {
                            let cluster_iid = cluster_slot.get().cloned().unwrap_or_default();
                            let info = handler.add_node_group(&cluster_iid, &group_request).await?;
                            let _ = slot.set(info.iid.clone());
                            Ok(())
                        }
                    },
                    {
                        let handler = handler.clone();
                        let cluster_slot = cluster_slot.clone();
                        let slot = group_slot.clone();
                        move || async move {
                            let cluster_iid = cluster_slot.get().cloned().unwrap_or_default();
                            match slot.get() {
                                Some(iid) => handler.remove_node_group(&cluster_iid, iid).await,
                                None => Ok(()),
                            }
                        }
                    },
                )
                .with_step(
                    &format!("{step_name} active"),
                    {
                        let handler = handler.clone();
                        let cluster_slot = cluster_slot.clone();
                        let slot = group_slot.clone();
                        move || async move {
                            let cluster_iid = cluster_slot.get().cloned().unwrap_or_default();
                            let iid = slot.get().cloned().unwrap_or_default();
                            await_node_group_active(&handler, &cluster_iid, &group_name, &iid, group_budget, overall_deadline)
                                .await
                        }
                    },
                    || async { Ok(()) },
                );
        }

        transaction.commit().await?;

        let driver_iid = cluster_slot.get().cloned().unwrap_or_default();
        let mut info = handler.get_cluster(&driver_iid).await.map_err(Box::new)?;
        info = stamp_cluster(info);
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        Ok(info)
    }

    #[named]
    pub async fn list_cluster(&self, connection_name: &str) -> Result<Vec<ClusterInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, "", function_name!());
        let started = call_log::start();
        let result = handler
            .list_cluster()
            .await
            .map_err(Box::new)
            .map(|clusters| clusters.into_iter().map(stamp_cluster).collect());
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_cluster(&self, connection_name: &str, cluster: &Iid) -> Result<ClusterInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, &cluster.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            handler.get_cluster(&resolved).await.map(stamp_cluster)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_cluster_status(
        &self,
        connection_name: &str,
        cluster: &Iid,
    ) -> Result<ClusterStatus, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, &cluster.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            handler.get_cluster_status(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Node groups go first, the control plane last: the reverse of
    /// creation, shared with rollback.
    #[named]
    pub async fn delete_cluster(&self, connection_name: &str, cluster: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, &cluster.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            let info = handler.get_cluster(&resolved).await?;

            let mut unwinder = Unwinder::new();
            {
                let handler = handler.clone();
                let iid = resolved.clone();
                unwinder.register("control plane", move || async move { handler.delete_cluster(&iid).await });
            }
            for group in info.node_groups {
                let handler = handler.clone();
                let cluster_iid = resolved.clone();
                let step_name = format!("node group {}", group.iid.display_name());
                unwinder.register(&step_name, move || async move {
                    handler.remove_node_group(&cluster_iid, &group.iid).await
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

    /// Adds one node group and waits until it is `Active`; a group that
    /// never settles is removed again before the error is surfaced.
    #[named]
    pub async fn add_node_group(
        &self,
        connection_name: &str,
        cluster: &Iid,
        request: NodeGroupRequest,
        deadline: Option<Duration>,
    ) -> Result<NodeGroupInfo, Box<EngineError>> {
        validate_node_group(&request)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::NodeGroup, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            let requested_name = request.iid.name_id.clone();
            let current = handler.get_cluster(&resolved).await?;
            if current
                .node_groups
                .iter()
                .any(|group| group.iid.display_name() == requested_name)
            {
                return Err(EngineError::AlreadyExists {
                    resource_type: ResourceType::NodeGroup,
                    name: requested_name,
                });
            }
            let group_request = NodeGroupRequest {
                iid: Iid::from_name(&encode_name(&requested_name)),
                ..request
            };
            let info = handler.add_node_group(&resolved, &group_request).await?;
            let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
            if let Err(original) = await_node_group_active(
                &handler,
                &resolved,
                &requested_name,
                &info.iid,
                self.config.budgets.node_group,
                overall_deadline,
            )
            .await
            {
                warn!("node group `{requested_name}` never settled, removing it: {original}");
                let failures = match handler.remove_node_group(&resolved, &info.iid).await {
                    Ok(()) => vec![],
                    Err(err) => vec![("remove node group".to_string(), err)],
                };
                return Err(wrap_rollback_failures(original, failures));
            }
            let mut info = handler
                .get_cluster(&resolved)
                .await?
                .node_groups
                .into_iter()
                .find(|group| group.iid.system_id == info.iid.system_id)
                .ok_or_else(|| EngineError::new_not_found(ResourceType::NodeGroup, &requested_name))?;
            info.iid = Iid::new(&requested_name, &info.iid.system_id);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn remove_node_group(
        &self,
        connection_name: &str,
        cluster: &Iid,
        node_group: &Iid,
    ) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::NodeGroup, &node_group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            let target = find_node_group(&handler, &resolved, node_group).await?;
            handler.remove_node_group(&resolved, &target).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn set_node_group_auto_scaling(
        &self,
        connection_name: &str,
        cluster: &Iid,
        node_group: &Iid,
        on: bool,
    ) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::NodeGroup, &node_group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_cluster(&handler, cluster).await?;
            let target = find_node_group(&handler, &resolved, node_group).await?;
            handler.set_node_group_auto_scaling(&resolved, &target, on).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn change_node_group_scaling(
        &self,
        connection_name: &str,
        cluster: &Iid,
        node_group: &Iid,
        desired: i32,
        min: i32,
        max: i32,
    ) -> Result<NodeGroupInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::NodeGroup, &node_group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            if min < 0 || max < min || desired < min || desired > max {
                return Err(EngineError::new_validation(format!(
                    "scaling bounds desired {desired} / min {min} / max {max} are inconsistent"
                )));
            }
            let resolved = resolve_cluster(&handler, cluster).await?;
            let target = find_node_group(&handler, &resolved, node_group).await?;
            let mut info = handler.change_node_group_scaling(&resolved, &target, desired, min, max).await?;
            info.iid = stamp(&info.iid);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Upgrades the control plane and waits until it reports `Active` again.
    #[named]
    pub async fn upgrade_cluster(
        &self,
        connection_name: &str,
        cluster: &Iid,
        version: &str,
        deadline: Option<Duration>,
    ) -> Result<ClusterInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.cluster_handler()?;
        let record = self.record(&bundle, ResourceType::Cluster, &cluster.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            if version.is_empty() {
                return Err(EngineError::new_validation("upgrade needs a target version".to_string()));
            }
            let resolved = resolve_cluster(&handler, cluster).await?;
            handler.upgrade_cluster(&resolved, version).await?;
            let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
            let waiter = Waiter::new(ResourceType::Cluster, &cluster.name_id, self.config.budgets.cluster_create)
                .with_deadline_until(overall_deadline);
            let status = waiter
                .await_terminal(
                    || {
                        let handler = handler.clone();
                        let iid = resolved.clone();
                        async move { handler.get_cluster_status(&iid).await }
                    },
                    ClusterStatus::is_update_terminal,
                )
                .await?;
            if status != ClusterStatus::Active {
                return Err(EngineError::new_provider(
                    "UpgradeCluster",
                    ResourceType::Cluster,
                    &cluster.name_id,
                    ProviderError::new_from_safe_message(format!("cluster entered terminal status {status}")),
                ));
            }
            handler.get_cluster(&resolved).await.map(stamp_cluster)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}

async fn find_node_group(
    handler: &Arc<dyn ClusterHandler>,
    cluster_iid: &Iid,
    reference: &Iid,
) -> Result<Iid, EngineError> {
    if !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let info = handler.get_cluster(cluster_iid).await?;
    let candidates: Vec<Iid> = info.node_groups.into_iter().map(|group| group.iid).collect();
    resolve(ResourceType::NodeGroup, reference, &candidates)
}
