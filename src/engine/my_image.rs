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
use crate::resources::my_image::{MyImageHandler, MyImageInfo, MyImageRequest, MyImageStatus};
use crate::transaction::wrap_rollback_failures;

pub(crate) async fn resolve_my_image(handler: &Arc<dyn MyImageHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_my_image().await?.into_iter().map(|image| image.iid).collect();
    resolve(ResourceType::MyImage, reference, &candidates)
}

fn stamp_my_image(mut info: MyImageInfo) -> MyImageInfo {
    info.iid = stamp(&info.iid);
    info.source_vm_iid = stamp(&info.source_vm_iid);
    info
}

impl Engine {
    /// Snapshots a VM into a caller-owned image and waits until it is
    /// `Available`. A snapshot that never settles is deleted again.
    #[named]
    pub async fn snapshot_vm(
        &self,
        connection_name: &str,
        request: MyImageRequest,
        deadline: Option<Duration>,
    ) -> Result<MyImageInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.my_image_handler()?;
        let vm_handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::MyImage, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let requested_name = request.iid.name_id.clone();
            let existing = handler.list_my_image().await?;
            if existing.iter().any(|image| image.iid.display_name() == requested_name) {
                return Err(EngineError::AlreadyExists {
                    resource_type: ResourceType::MyImage,
                    name: requested_name,
                });
            }
            let source_vm_iid = super::vm::resolve_vm(&vm_handler, &request.source_vm_iid).await?;
            let request = MyImageRequest {
                iid: Iid::from_name(&encode_name(&requested_name)),
                source_vm_iid,
                ..request
            };
            let info = handler.snapshot_vm(request).await?;
            let driver_iid = info.iid.clone();

            let waiter = Waiter::new(ResourceType::MyImage, &requested_name, self.config.budgets.my_image)
                .with_deadline(self.deadline(deadline));
            let outcome = waiter
                .await_terminal(
                    || {
                        let handler = handler.clone();
                        let iid = driver_iid.clone();
                        async move { handler.get_my_image(&iid).await.map(|image| image.status) }
                    },
                    MyImageStatus::is_create_terminal,
                )
                .await;
            let snapshot_error = match outcome {
                Ok(MyImageStatus::Available) => None,
                Ok(status) => Some(EngineError::new_provider(
                    "SnapshotVM",
                    ResourceType::MyImage,
                    &requested_name,
                    ProviderError::new_from_safe_message(format!("snapshot entered terminal status {status}")),
                )),
                Err(err) => Some(err),
            };
            if let Some(original) = snapshot_error {
                warn!("snapshot `{requested_name}` never settled, deleting it: {original}");
                let failures = match handler.delete_my_image(&driver_iid).await {
                    Ok(()) => vec![],
                    Err(err) => vec![("delete snapshot".to_string(), err)],
                };
                return Err(wrap_rollback_failures(original, failures));
            }

            let mut info = handler.get_my_image(&driver_iid).await?;
            info = stamp_my_image(info);
            info.iid = Iid::new(&requested_name, &info.iid.system_id);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn list_my_image(&self, connection_name: &str) -> Result<Vec<MyImageInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.my_image_handler()?;
        let record = self.record(&bundle, ResourceType::MyImage, "", function_name!());
        let started = call_log::start();
        let result = handler
            .list_my_image()
            .await
            .map_err(Box::new)
            .map(|images| images.into_iter().map(stamp_my_image).collect());
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_my_image(&self, connection_name: &str, image: &Iid) -> Result<MyImageInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.my_image_handler()?;
        let record = self.record(&bundle, ResourceType::MyImage, &image.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_my_image(&handler, image).await?;
            handler.get_my_image(&resolved).await.map(stamp_my_image)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn delete_my_image(&self, connection_name: &str, image: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.my_image_handler()?;
        let record = self.record(&bundle, ResourceType::MyImage, &image.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_my_image(&handler, image).await?;
            handler.delete_my_image(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
