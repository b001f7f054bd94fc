use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FileSystemRequest {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub access_subnet_iids: Vec<Iid>,
    /// NFS protocol version, backend default when empty.
    pub nfs_version: String,
    /// Capacity in GB, -1 for the backend default.
    pub capacity_gb: i64,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileSystemInfo {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub access_subnet_iids: Vec<Iid>,
    pub nfs_version: String,
    pub capacity_gb: i64,
    pub used_size_gb: i64,
    pub mount_targets: Vec<MountTargetInfo>,
    pub status: FileSystemStatus,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MountTargetInfo {
    pub subnet_iid: Iid,
    pub endpoint: String,
    pub mount_command_example: String,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum FileSystemStatus {
    Creating,
    Available,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl FileSystemStatus {
    pub fn from_provider(raw: &str) -> FileSystemStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, FileSystemStatus::Available | FileSystemStatus::Error)
    }
}

#[async_trait]
pub trait FileSystemHandler: Send + Sync {
    /// Creates the file system only; access subnets are coordinator steps.
    async fn create_file_system(&self, request: &FileSystemRequest) -> Result<FileSystemInfo, EngineError>;
    async fn list_file_system(&self) -> Result<Vec<FileSystemInfo>, EngineError>;
    async fn get_file_system(&self, iid: &Iid) -> Result<FileSystemInfo, EngineError>;
    async fn get_file_system_status(&self, iid: &Iid) -> Result<FileSystemStatus, EngineError>;
    async fn delete_file_system(&self, iid: &Iid) -> Result<(), EngineError>;

    async fn add_access_subnet(&self, iid: &Iid, subnet_iid: &Iid) -> Result<MountTargetInfo, EngineError>;
    async fn remove_access_subnet(&self, iid: &Iid, subnet_iid: &Iid) -> Result<(), EngineError>;
    async fn list_access_subnets(&self, iid: &Iid) -> Result<Vec<Iid>, EngineError>;
}
