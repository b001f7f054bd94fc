use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NlbType {
    #[default]
    Public,
    Internal,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NlbScope {
    #[default]
    Region,
    Global,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Listener {
    /// "TCP" or "UDP".
    pub protocol: String,
    pub port: String,
    pub ip: String,
    pub dns_name: String,
    pub key_values: Vec<KeyValue>,
}

/// Backend pool: the VMs traffic is forwarded to.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct VmGroup {
    pub protocol: String,
    pub port: String,
    pub vms: Vec<Iid>,
    pub key_values: Vec<KeyValue>,
}

/// `-1` on interval/timeout/threshold means "use the engine default for the
/// listener protocol".
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HealthChecker {
    pub protocol: String,
    pub port: String,
    pub interval: i32,
    pub timeout: i32,
    pub threshold: i32,
    pub key_values: Vec<KeyValue>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        HealthChecker {
            protocol: "TCP".to_string(),
            port: String::new(),
            interval: -1,
            timeout: -1,
            threshold: -1,
            key_values: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthInfo {
    pub all_vms: Vec<Iid>,
    pub healthy_vms: Vec<Iid>,
    pub unhealthy_vms: Vec<Iid>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NlbRequest {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub nlb_type: NlbType,
    pub scope: NlbScope,
    pub listener: Listener,
    pub vm_group: VmGroup,
    pub health_checker: HealthChecker,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NlbInfo {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub nlb_type: NlbType,
    pub scope: NlbScope,
    pub listener: Listener,
    pub vm_group: VmGroup,
    pub health_checker: HealthChecker,
    pub status: NlbStatus,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

/// Composite status: `Active` only once every sub-resource (listener, pool,
/// health monitor, members, public IP) reports terminal success.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum NlbStatus {
    Creating,
    Active,
    Changing,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl NlbStatus {
    pub fn from_provider(raw: &str) -> NlbStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, NlbStatus::Active | NlbStatus::Error)
    }
}

/// Capability contract for network load balancers, granular because an NLB
/// is assembled from ordered sub-resources. Creation order is
/// load-balancer -> listener -> VM group -> health monitor -> members ->
/// public IP; deletion and rollback run strictly in reverse.
#[async_trait]
pub trait NlbHandler: Send + Sync {
    async fn create_load_balancer(&self, request: &NlbRequest) -> Result<Iid, EngineError>;
    async fn create_listener(&self, nlb_iid: &Iid, listener: &Listener) -> Result<Iid, EngineError>;
    async fn create_vm_group(&self, nlb_iid: &Iid, vm_group: &VmGroup) -> Result<Iid, EngineError>;
    async fn create_health_monitor(&self, nlb_iid: &Iid, checker: &HealthChecker) -> Result<Iid, EngineError>;
    async fn register_vms(&self, nlb_iid: &Iid, vms: &[Iid]) -> Result<(), EngineError>;
    async fn allocate_public_ip(&self, nlb_iid: &Iid) -> Result<String, EngineError>;

    async fn release_public_ip(&self, nlb_iid: &Iid) -> Result<(), EngineError>;
    async fn deregister_vms(&self, nlb_iid: &Iid, vms: &[Iid]) -> Result<(), EngineError>;
    async fn delete_health_monitor(&self, nlb_iid: &Iid) -> Result<(), EngineError>;
    async fn delete_vm_group(&self, nlb_iid: &Iid) -> Result<(), EngineError>;
    async fn delete_listener(&self, nlb_iid: &Iid) -> Result<(), EngineError>;
    async fn delete_load_balancer(&self, nlb_iid: &Iid) -> Result<(), EngineError>;

    async fn list_nlb(&self) -> Result<Vec<NlbInfo>, EngineError>;
    async fn get_nlb(&self, iid: &Iid) -> Result<NlbInfo, EngineError>;
    async fn get_nlb_status(&self, iid: &Iid) -> Result<NlbStatus, EngineError>;
    async fn get_vm_group_health(&self, iid: &Iid) -> Result<HealthInfo, EngineError>;

    async fn change_listener(&self, iid: &Iid, listener: &Listener) -> Result<NlbInfo, EngineError>;
    async fn change_health_checker(&self, iid: &Iid, checker: &HealthChecker) -> Result<NlbInfo, EngineError>;
}
