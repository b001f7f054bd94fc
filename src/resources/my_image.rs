use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MyImageRequest {
    pub iid: Iid,
    pub source_vm_iid: Iid,
    pub tags: Vec<KeyValue>,
}

/// Caller-owned machine image snapshotted from a VM.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MyImageInfo {
    pub iid: Iid,
    pub source_vm_iid: Iid,
    pub status: MyImageStatus,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum MyImageStatus {
    Snapshotting,
    Available,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl MyImageStatus {
    pub fn from_provider(raw: &str) -> MyImageStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, MyImageStatus::Available | MyImageStatus::Error)
    }
}

#[async_trait]
pub trait MyImageHandler: Send + Sync {
    async fn snapshot_vm(&self, request: MyImageRequest) -> Result<MyImageInfo, EngineError>;
    async fn list_my_image(&self) -> Result<Vec<MyImageInfo>, EngineError>;
    async fn get_my_image(&self, iid: &Iid) -> Result<MyImageInfo, EngineError>;
    async fn delete_my_image(&self, iid: &Iid) -> Result<(), EngineError>;
}
