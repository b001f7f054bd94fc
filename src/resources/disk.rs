use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

/// Provider-allowed block storage size range, in GB.
pub const MIN_DISK_SIZE_GB: i64 = 1;
pub const MAX_DISK_SIZE_GB: i64 = 16_384;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DiskRequest {
    pub iid: Iid,
    pub zone: String,
    /// "", "default" or a backend volume type ("SSD", "gp3", ...).
    pub disk_type: String,
    pub disk_size_gb: i64,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DiskInfo {
    pub iid: Iid,
    pub zone: String,
    pub disk_type: String,
    pub disk_size_gb: i64,
    pub status: DiskStatus,
    pub owner_vm: Option<Iid>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum DiskStatus {
    Creating,
    Available,
    Attached,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl DiskStatus {
    pub fn from_provider(raw: &str) -> DiskStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, DiskStatus::Available | DiskStatus::Error)
    }
}

#[async_trait]
pub trait DiskHandler: Send + Sync {
    async fn create_disk(&self, request: DiskRequest) -> Result<DiskInfo, EngineError>;
    async fn list_disk(&self) -> Result<Vec<DiskInfo>, EngineError>;
    async fn get_disk(&self, iid: &Iid) -> Result<DiskInfo, EngineError>;
    async fn change_disk_size(&self, iid: &Iid, size_gb: i64) -> Result<(), EngineError>;
    async fn delete_disk(&self, iid: &Iid) -> Result<(), EngineError>;
    async fn attach_disk(&self, iid: &Iid, vm_iid: &Iid) -> Result<DiskInfo, EngineError>;
    async fn detach_disk(&self, iid: &Iid, vm_iid: &Iid) -> Result<(), EngineError>;
}
