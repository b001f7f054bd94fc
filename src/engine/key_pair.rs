use std::sync::Arc;

use function_name::named;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::EngineError;
use crate::iid::{Iid, encode_name, resolve};
use crate::resources::ResourceType;
use crate::resources::key_pair::{KeyPairHandler, KeyPairInfo, KeyPairRequest};

pub(crate) async fn resolve_key_pair(handler: &Arc<dyn KeyPairHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_key_pair().await?.into_iter().map(|key| key.iid).collect();
    resolve(ResourceType::KeyPair, reference, &candidates)
}

impl Engine {
    /// The private key is returned here and never again; the engine does
    /// not keep a copy.
    #[named]
    pub async fn create_key_pair(
        &self,
        connection_name: &str,
        request: KeyPairRequest,
    ) -> Result<KeyPairInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.key_pair_handler()?;
        let record = self.record(&bundle, ResourceType::KeyPair, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let requested_name = request.iid.name_id.clone();
            let existing = handler.list_key_pair().await?;
            if existing.iter().any(|key| key.iid.display_name() == requested_name) {
                return Err(EngineError::AlreadyExists {
                    resource_type: ResourceType::KeyPair,
                    name: requested_name,
                });
            }
            let request = KeyPairRequest {
                iid: Iid::from_name(&encode_name(&requested_name)),
                ..request
            };
            let mut info = handler.create_key_pair(request).await?;
            info.iid = Iid::new(&requested_name, &info.iid.system_id);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn list_key_pair(&self, connection_name: &str) -> Result<Vec<KeyPairInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.key_pair_handler()?;
        let record = self.record(&bundle, ResourceType::KeyPair, "", function_name!());
        let started = call_log::start();
        let result = handler.list_key_pair().await.map_err(Box::new).map(|mut keys| {
            for key in &mut keys {
                key.iid = stamp(&key.iid);
            }
            keys
        });
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_key_pair(&self, connection_name: &str, key_pair: &Iid) -> Result<KeyPairInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.key_pair_handler()?;
        let record = self.record(&bundle, ResourceType::KeyPair, &key_pair.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_key_pair(&handler, key_pair).await?;
            let mut info = handler.get_key_pair(&resolved).await?;
            info.iid = stamp(&info.iid);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn delete_key_pair(&self, connection_name: &str, key_pair: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.key_pair_handler()?;
        let record = self.record(&bundle, ResourceType::KeyPair, &key_pair.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_key_pair(&handler, key_pair).await?;
            handler.delete_key_pair(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
