use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::{ImageType, KeyValue, Platform, RegionInfo};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VmRequest {
    pub iid: Iid,
    pub image_type: ImageType,
    pub image_iid: Iid,
    pub vpc_iid: Iid,
    pub subnet_iid: Iid,
    pub security_group_iids: Vec<Iid>,
    pub vm_spec_name: String,
    pub key_pair_iid: Iid,
    /// "", "default" or a size in GB.
    pub root_disk_type: String,
    pub root_disk_size: String,
    pub data_disk_iids: Vec<Iid>,
    pub vm_user_id: String,
    pub vm_user_passwd: String,
    pub windows: bool,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VmInfo {
    pub iid: Iid,
    pub started_at: DateTime<Utc>,
    pub region: RegionInfo,
    pub image_type: ImageType,
    pub image_iid: Iid,
    pub vm_spec_name: String,
    pub vpc_iid: Iid,
    pub subnet_iid: Iid,
    pub security_group_iids: Vec<Iid>,
    pub key_pair_iid: Iid,
    pub root_disk_type: String,
    pub root_disk_size: String,
    pub root_device_name: String,
    pub data_disk_iids: Vec<Iid>,
    pub vm_user_id: String,
    pub vm_user_passwd: String,
    pub network_interface: String,
    pub public_ip: String,
    pub public_dns: String,
    pub private_ip: String,
    pub private_dns: String,
    pub platform: Platform,
    /// `ip:port` the guest OS is reachable on once booted.
    pub access_point: String,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VmStatusInfo {
    pub iid: Iid,
    pub status: VmStatus,
}

/// Closed status set every backend's native vocabulary maps onto.
/// Unmapped values become `Unknown`, never an error.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum VmStatus {
    Creating,
    Running,
    Suspending,
    Suspended,
    Resuming,
    Rebooting,
    Terminating,
    Terminated,
    NotExist,
    Failed,
    #[default]
    Unknown,
}

impl VmStatus {
    pub fn from_provider(raw: &str) -> VmStatus {
        raw.parse().unwrap_or_default()
    }

    /// Terminal for boot reconciliation: the VM either serves or never will.
    pub fn is_boot_terminal(&self) -> bool {
        matches!(self, VmStatus::Running | VmStatus::Failed)
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, VmStatus::Terminated | VmStatus::NotExist)
    }
}

#[async_trait]
pub trait VmHandler: Send + Sync {
    async fn start_vm(&self, request: VmRequest) -> Result<VmInfo, EngineError>;

    async fn suspend_vm(&self, iid: &Iid) -> Result<VmStatus, EngineError>;
    async fn resume_vm(&self, iid: &Iid) -> Result<VmStatus, EngineError>;
    async fn reboot_vm(&self, iid: &Iid) -> Result<VmStatus, EngineError>;
    async fn terminate_vm(&self, iid: &Iid) -> Result<VmStatus, EngineError>;

    async fn list_vm_status(&self) -> Result<Vec<VmStatusInfo>, EngineError>;
    async fn get_vm_status(&self, iid: &Iid) -> Result<VmStatus, EngineError>;

    async fn list_vm(&self) -> Result<Vec<VmInfo>, EngineError>;
    async fn get_vm(&self, iid: &Iid) -> Result<VmInfo, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_provider_status_is_unknown() {
        assert_eq!(VmStatus::from_provider("SHELVED_OFFLOADED"), VmStatus::Unknown);
        assert_eq!(VmStatus::from_provider("Running"), VmStatus::Running);
    }
}
