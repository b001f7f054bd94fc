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
use crate::resources::disk::{DiskHandler, DiskInfo, DiskRequest, DiskStatus, MAX_DISK_SIZE_GB, MIN_DISK_SIZE_GB};
use crate::transaction::wrap_rollback_failures;

pub(crate) async fn resolve_disk(handler: &Arc<dyn DiskHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_disk().await?.into_iter().map(|disk| disk.iid).collect();
    resolve(ResourceType::Disk, reference, &candidates)
}

impl Engine {
    /// Creates a block volume and waits until it is `Available`. Size is
    /// validated before any backend call.
    #[named]
    pub async fn create_disk(
        &self,
        connection_name: &str,
        request: DiskRequest,
        deadline: Option<Duration>,
    ) -> Result<DiskInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        if request.disk_size_gb < MIN_DISK_SIZE_GB || request.disk_size_gb > MAX_DISK_SIZE_GB {
            return Err(Box::new(EngineError::new_validation(format!(
                "disk size {}GB is outside the allowed {}..{}GB range",
                request.disk_size_gb, MIN_DISK_SIZE_GB, MAX_DISK_SIZE_GB
            ))));
        }
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.create_disk_inner(&handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn create_disk_inner(
        &self,
        handler: &Arc<dyn DiskHandler>,
        mut request: DiskRequest,
        deadline: Option<Duration>,
    ) -> Result<DiskInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_disk().await.map_err(Box::new)?;
        if existing.iter().any(|disk| disk.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::Disk,
                name: requested_name,
            }));
        }

        request.iid = Iid::from_name(&encode_name(&requested_name));
        let info = handler.create_disk(request).await.map_err(Box::new)?;
        let driver_iid = info.iid.clone();

        let waiter = Waiter::new(ResourceType::Disk, &requested_name, self.config.budgets.disk_create)
            .with_deadline(self.deadline(deadline));
        let outcome = waiter
            .await_terminal(
                || {
                    let handler = handler.clone();
                    let iid = driver_iid.clone();
                    async move { handler.get_disk(&iid).await.map(|disk| disk.status) }
                },
                DiskStatus::is_create_terminal,
            )
            .await;

        let create_error = match outcome {
            Ok(DiskStatus::Available) => None,
            Ok(status) => Some(EngineError::new_provider(
                "CreateDisk",
                ResourceType::Disk,
                &requested_name,
                ProviderError::new_from_safe_message(format!("disk entered terminal status {status}")),
            )),
            Err(err) => Some(err),
        };
        if let Some(original) = create_error {
            warn!("disk `{requested_name}` never became Available, deleting it: {original}");
            let failures = match handler.delete_disk(&driver_iid).await {
                Ok(()) => vec![],
                Err(err) => vec![("delete disk".to_string(), err)],
            };
            return Err(Box::new(wrap_rollback_failures(original, failures)));
        }

        let mut info = handler.get_disk(&driver_iid).await.map_err(Box::new)?;
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        Ok(info)
    }

    #[named]
    pub async fn list_disk(&self, connection_name: &str) -> Result<Vec<DiskInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, "", function_name!());
        let started = call_log::start();
        let result = handler.list_disk().await.map_err(Box::new).map(|mut disks| {
            for disk in &mut disks {
                disk.iid = stamp(&disk.iid);
                disk.owner_vm = disk.owner_vm.as_ref().map(stamp);
            }
            disks
        });
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_disk(&self, connection_name: &str, disk: &Iid) -> Result<DiskInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &disk.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_disk(&handler, disk).await?;
            let mut info = handler.get_disk(&resolved).await?;
            info.iid = stamp(&info.iid);
            info.owner_vm = info.owner_vm.as_ref().map(stamp);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Grows a volume; shrinking is rejected because no backend supports it.
    #[named]
    pub async fn change_disk_size(
        &self,
        connection_name: &str,
        disk: &Iid,
        size_gb: i64,
    ) -> Result<DiskInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &disk.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            if size_gb > MAX_DISK_SIZE_GB {
                return Err(EngineError::new_validation(format!(
                    "disk size {size_gb}GB is over the allowed maximum {MAX_DISK_SIZE_GB}GB"
                )));
            }
            let resolved = resolve_disk(&handler, disk).await?;
            let current = handler.get_disk(&resolved).await?;
            if size_gb <= current.disk_size_gb {
                return Err(EngineError::new_validation(format!(
                    "disk {} is already {}GB, new size must be larger",
                    disk.name_id, current.disk_size_gb
                )));
            }
            handler.change_disk_size(&resolved, size_gb).await?;
            let mut info = handler.get_disk(&resolved).await?;
            info.iid = stamp(&info.iid);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn attach_disk(
        &self,
        connection_name: &str,
        disk: &Iid,
        vm: &Iid,
    ) -> Result<DiskInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let vm_handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &disk.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved_disk = resolve_disk(&handler, disk).await?;
            let resolved_vm = super::vm::resolve_vm(&vm_handler, vm).await?;
            let mut info = handler.attach_disk(&resolved_disk, &resolved_vm).await?;
            info.iid = stamp(&info.iid);
            info.owner_vm = info.owner_vm.as_ref().map(stamp);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn detach_disk(&self, connection_name: &str, disk: &Iid, vm: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let vm_handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &disk.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved_disk = resolve_disk(&handler, disk).await?;
            let resolved_vm = super::vm::resolve_vm(&vm_handler, vm).await?;
            handler.detach_disk(&resolved_disk, &resolved_vm).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Deleting an attached disk is rejected; detach first.
    #[named]
    pub async fn delete_disk(&self, connection_name: &str, disk: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.disk_handler()?;
        let record = self.record(&bundle, ResourceType::Disk, &disk.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_disk(&handler, disk).await?;
            let current = handler.get_disk(&resolved).await?;
            if current.status == DiskStatus::Attached {
                return Err(EngineError::new_validation(format!(
                    "disk {} is attached to {}, detach it first",
                    disk.name_id,
                    current.owner_vm.map(|vm| vm.name_id).unwrap_or_default()
                )));
            }
            handler.delete_disk(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
