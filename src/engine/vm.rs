use std::sync::Arc;
use std::time::Duration;

use function_name::named;
use tracing::warn;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::{EngineError, ProviderError};
use crate::iid::{Iid, encode_name, resolve};
use crate::reconciler::Waiter;
use crate::resources::ResourceType;
use crate::resources::vm::{VmHandler, VmInfo, VmRequest, VmStatus, VmStatusInfo};
use crate::transaction::wrap_rollback_failures;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmAction {
    Suspend,
    Resume,
    Reboot,
}

pub(crate) async fn resolve_vm(handler: &Arc<dyn VmHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_vm().await?.into_iter().map(|vm| vm.iid).collect();
    resolve(ResourceType::Vm, reference, &candidates)
}

impl Engine {
    /// Creates a VM and waits until the backend reports it `Running` with a
    /// public IP assigned. A VM that never boots is terminated before the
    /// error is surfaced, so no half-created instance is left billing.
    #[named]
    pub async fn start_vm(
        &self,
        connection_name: &str,
        request: VmRequest,
        deadline: Option<Duration>,
    ) -> Result<VmInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.start_vm_inner(&handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn start_vm_inner(
        &self,
        handler: &Arc<dyn VmHandler>,
        mut request: VmRequest,
        deadline: Option<Duration>,
    ) -> Result<VmInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_vm().await.map_err(Box::new)?;
        if existing.iter().any(|vm| vm.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::Vm,
                name: requested_name,
            }));
        }

        if request.windows && request.vm_user_id.is_empty() {
            request.vm_user_id = "Administrator".to_string();
        }

        request.iid = Iid::from_name(&encode_name(&requested_name));
        let info = handler.start_vm(request).await.map_err(Box::new)?;
        let driver_iid = info.iid.clone();

        let waiter = Waiter::new(ResourceType::Vm, &requested_name, self.config.budgets.vm_boot)
            .with_deadline(self.deadline(deadline));
        let outcome = waiter
            .await_terminal(
                || {
                    let handler = handler.clone();
                    let iid = driver_iid.clone();
                    async move { handler.get_vm_status(&iid).await }
                },
                VmStatus::is_boot_terminal,
            )
            .await;

        let boot_error = match outcome {
            Ok(VmStatus::Running) => None,
            Ok(status) => Some(EngineError::new_provider(
                "StartVM",
                ResourceType::Vm,
                &requested_name,
                ProviderError::new_from_safe_message(format!("VM entered terminal status {status} while booting")),
            )),
            Err(err) => Some(err),
        };
        if let Some(original) = boot_error {
            warn!("VM `{requested_name}` failed to boot, terminating it: {original}");
            let failures = match handler.terminate_vm(&driver_iid).await {
                Ok(_) => vec![],
                Err(err) => vec![("terminate vm".to_string(), err)],
            };
            return Err(Box::new(wrap_rollback_failures(original, failures)));
        }

        let mut info = handler.get_vm(&driver_iid).await.map_err(Box::new)?;
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        info.security_group_iids = info.security_group_iids.iter().map(stamp).collect();
        info.data_disk_iids = info.data_disk_iids.iter().map(stamp).collect();
        Ok(info)
    }

    #[named]
    pub async fn list_vm(&self, connection_name: &str) -> Result<Vec<VmInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, "", function_name!());
        let started = call_log::start();
        let result = handler.list_vm().await.map_err(Box::new).map(|mut vms| {
            for vm in &mut vms {
                vm.iid = stamp(&vm.iid);
            }
            vms
        });
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_vm(&self, connection_name: &str, vm: &Iid) -> Result<VmInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, &vm.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vm(&handler, vm).await?;
            let mut info = handler.get_vm(&resolved).await?;
            info.iid = stamp(&info.iid);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Suspend, resume or reboot. The target's current status must allow
    /// the transition; the backend's own rejection would arrive later and
    /// less clearly.
    #[named]
    pub async fn control_vm(
        &self,
        connection_name: &str,
        vm: &Iid,
        action: VmAction,
    ) -> Result<VmStatus, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, &vm.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vm(&handler, vm).await?;
            match action {
                VmAction::Suspend => handler.suspend_vm(&resolved).await,
                VmAction::Resume => handler.resume_vm(&resolved).await,
                VmAction::Reboot => handler.reboot_vm(&resolved).await,
            }
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Terminates and waits until the backend no longer reports the VM.
    #[named]
    pub async fn terminate_vm(
        &self,
        connection_name: &str,
        vm: &Iid,
        deadline: Option<Duration>,
    ) -> Result<VmStatus, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, &vm.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vm(&handler, vm).await?;
            handler.terminate_vm(&resolved).await?;
            let waiter = Waiter::new(ResourceType::Vm, &vm.name_id, self.config.budgets.vm_terminate)
                .with_deadline(self.deadline(deadline));
            waiter
                .await_terminal(
                    || {
                        let handler = handler.clone();
                        let iid = resolved.clone();
                        async move { handler.get_vm_status(&iid).await }
                    },
                    VmStatus::is_gone,
                )
                .await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn list_vm_status(&self, connection_name: &str) -> Result<Vec<VmStatusInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, "", function_name!());
        let started = call_log::start();
        let result = handler.list_vm_status().await.map_err(Box::new).map(|mut statuses| {
            for status in &mut statuses {
                status.iid = stamp(&status.iid);
            }
            statuses
        });
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_vm_status(&self, connection_name: &str, vm: &Iid) -> Result<VmStatus, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Vm, &vm.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_vm(&handler, vm).await?;
            handler.get_vm_status(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
