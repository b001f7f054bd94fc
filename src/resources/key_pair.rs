use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct KeyPairRequest {
    pub iid: Iid,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct KeyPairInfo {
    pub iid: Iid,
    pub fingerprint: String,
    pub public_key: String,
    /// Returned once at creation; listings leave it empty.
    pub private_key: String,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[async_trait]
pub trait KeyPairHandler: Send + Sync {
    async fn create_key_pair(&self, request: KeyPairRequest) -> Result<KeyPairInfo, EngineError>;
    async fn list_key_pair(&self) -> Result<Vec<KeyPairInfo>, EngineError>;
    async fn get_key_pair(&self, iid: &Iid) -> Result<KeyPairInfo, EngineError>;
    async fn delete_key_pair(&self, iid: &Iid) -> Result<(), EngineError>;
}
