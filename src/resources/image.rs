use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

/// Public machine image catalogs are read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ImageInfo {
    pub iid: Iid,
    pub guest_os: String,
    pub status: String,
    pub key_values: Vec<KeyValue>,
}

#[async_trait]
pub trait ImageHandler: Send + Sync {
    async fn list_image(&self) -> Result<Vec<ImageInfo>, EngineError>;
    async fn get_image(&self, iid: &Iid) -> Result<ImageInfo, EngineError>;
}
