use std::sync::{Arc, OnceLock};
use std::time::Duration;

use function_name::named;
use tokio::time::Instant;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::{EngineError, ProviderError};
use crate::iid::{Iid, encode_name, resolve};
use crate::reconciler::{PollBudget, Waiter};
use crate::resources::ResourceType;
use crate::resources::file_system::{
    FileSystemHandler, FileSystemInfo, FileSystemRequest, FileSystemStatus, MountTargetInfo,
};
use crate::transaction::{Transaction, Unwinder};

pub(crate) async fn resolve_file_system(
    handler: &Arc<dyn FileSystemHandler>,
    reference: &Iid,
) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_file_system().await?.into_iter().map(|fs| fs.iid).collect();
    resolve(ResourceType::FileSystem, reference, &candidates)
}

async fn await_file_system_available(
    handler: &Arc<dyn FileSystemHandler>,
    name: &str,
    iid: &Iid,
    budget: PollBudget,
    deadline: Option<Instant>,
) -> Result<(), EngineError> {
    let waiter = Waiter::new(ResourceType::FileSystem, name, budget).with_deadline_until(deadline);
    let status = waiter
        .await_terminal(
            || {
                let handler = Arc::clone(handler);
                let iid = Iid::clone(iid);
                async move { handler.get_file_system_status(&iid).await }
            },
            FileSystemStatus::is_create_terminal,
        )
        .await?;
    if status != FileSystemStatus::Available {
        return Err(EngineError::new_provider(
            "CreateFileSystem",
            ResourceType::FileSystem,
            name,
            ProviderError::new_from_safe_message(format!("file system entered terminal status {status}")),
        ));
    }
    Ok(())
}

fn stamp_file_system(mut info: FileSystemInfo) -> FileSystemInfo {
    info.iid = stamp(&info.iid);
    info.vpc_iid = stamp(&info.vpc_iid);
    info.access_subnet_iids = info.access_subnet_iids.iter().map(stamp).collect();
    for target in &mut info.mount_targets {
        target.subnet_iid = stamp(&target.subnet_iid);
    }
    info
}

impl Engine {
    /// Creates the file system, waits until it is `Available`, then exposes
    /// it to each access subnet in order; a failure unwinds the mount
    /// targets already created and then the file system itself.
    #[named]
    pub async fn create_file_system(
        &self,
        connection_name: &str,
        request: FileSystemRequest,
        deadline: Option<Duration>,
    ) -> Result<FileSystemInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        if request.capacity_gb != -1 && request.capacity_gb < 1 {
            return Err(Box::new(EngineError::new_validation(format!(
                "file system capacity {}GB is invalid",
                request.capacity_gb
            ))));
        }
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.create_file_system_inner(&bundle.connection, &handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn create_file_system_inner(
        &self,
        connection: &Arc<dyn crate::cloud_provider::CloudConnection>,
        handler: &Arc<dyn FileSystemHandler>,
        mut request: FileSystemRequest,
        deadline: Option<Duration>,
    ) -> Result<FileSystemInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_file_system().await.map_err(Box::new)?;
        if existing.iter().any(|fs| fs.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::FileSystem,
                name: requested_name,
            }));
        }

        let vpc_handler = connection.vpc_handler()?;
        request.vpc_iid = super::vpc::resolve_vpc(&vpc_handler, &request.vpc_iid).await.map_err(Box::new)?;
        let access_subnets = std::mem::take(&mut request.access_subnet_iids);

        let budget = self.config.budgets.file_system;
        let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
        let fs_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());

        let shell_request = FileSystemRequest {
            iid: Iid::from_name(&encode_name(&requested_name)),
            ..request.clone()
        };

        // creation and settling are separate steps: a file system that
        // never becomes Available must still be deleted by its own
        // compensation
        let mut transaction = Transaction::new()
            .with_step(
                "file system",
                {
                    let handler = handler.clone();
                    let slot = fs_slot.clone();
                    move || async move {
                        let info = handler.create_file_system(&shell_request).await?;
                        let _ = slot.set(info.iid.clone());
                        Ok(())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = fs_slot.clone();
                    move || async move {
                        match slot.get() {
                            Some(iid) => handler.delete_file_system(iid).await,
                            None => Ok(()),
                        }
                    }
                },
            )
            .with_step(
                "file system available",
                {
                    let handler = handler.clone();
                    let slot = fs_slot.clone();
                    let name = requested_name.clone();
                    move || async move {
                        let iid = slot.get().cloned().unwrap_or_default();
                        await_file_system_available(&handler, &name, &iid, budget, overall_deadline).await
                    }
                },
                || async { Ok(()) },
            );

        for subnet in access_subnets {
            let step_name = format!("access subnet {}", subnet.display_name());
            transaction = transaction.with_step(
                &step_name,
                {
                    let handler = handler.clone();
                    let fs_slot = fs_slot.clone();
                    let subnet = subnet.clone();
                    move || async move {
                        let fs_iid = fs_slot.get().cloned().unwrap_or_default();
                        handler.add_access_subnet(&fs_iid, &subnet).await.map(|_| ())
                    }
                },
                {
                    let handler = handler.clone();
                    let fs_slot = fs_slot.clone();
                    move || async move {
                        let fs_iid = fs_slot.get().cloned().unwrap_or_default();
                        handler.remove_access_subnet(&fs_iid, &subnet).await
                    }
                },
            );
        }

        transaction.commit().await?;

        let driver_iid = fs_slot.get().cloned().unwrap_or_default();
        let mut info = handler.get_file_system(&driver_iid).await.map_err(Box::new)?;
        info = stamp_file_system(info);
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        Ok(info)
    }

    #[named]
    pub async fn list_file_system(&self, connection_name: &str) -> Result<Vec<FileSystemInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, "", function_name!());
        let started = call_log::start();
        let result = handler
            .list_file_system()
            .await
            .map_err(Box::new)
            .map(|systems| systems.into_iter().map(stamp_file_system).collect());
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_file_system(&self, connection_name: &str, fs: &Iid) -> Result<FileSystemInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &fs.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_file_system(&handler, fs).await?;
            handler.get_file_system(&resolved).await.map(stamp_file_system)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Mount targets go first, the file system last: reverse creation
    /// order, shared with rollback.
    #[named]
    pub async fn delete_file_system(&self, connection_name: &str, fs: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &fs.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_file_system(&handler, fs).await?;
            let info = handler.get_file_system(&resolved).await?;

            let mut unwinder = Unwinder::new();
            {
                let handler = handler.clone();
                let iid = resolved.clone();
                unwinder.register("file system", move || async move { handler.delete_file_system(&iid).await });
            }
            for subnet in info.access_subnet_iids {
                let handler = handler.clone();
                let fs_iid = resolved.clone();
                let step_name = format!("access subnet {}", subnet.display_name());
                unwinder.register(&step_name, move || async move {
                    handler.remove_access_subnet(&fs_iid, &subnet).await
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
    pub async fn add_access_subnet(
        &self,
        connection_name: &str,
        fs: &Iid,
        subnet: &Iid,
    ) -> Result<MountTargetInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &fs.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_file_system(&handler, fs).await?;
            let mut target = handler.add_access_subnet(&resolved, subnet).await?;
            target.subnet_iid = stamp(&target.subnet_iid);
            Ok(target)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn remove_access_subnet(
        &self,
        connection_name: &str,
        fs: &Iid,
        subnet: &Iid,
    ) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &fs.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_file_system(&handler, fs).await?;
            handler.remove_access_subnet(&resolved, subnet).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn list_access_subnets(&self, connection_name: &str, fs: &Iid) -> Result<Vec<Iid>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.file_system_handler()?;
        let record = self.record(&bundle, ResourceType::FileSystem, &fs.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_file_system(&handler, fs).await?;
            let subnets = handler.list_access_subnets(&resolved).await?;
            Ok(subnets.iter().map(stamp).collect())
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
