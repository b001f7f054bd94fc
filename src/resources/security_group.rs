use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    #[default]
    Inbound,
    Outbound,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityRule {
    pub direction: RuleDirection,
    /// "tcp", "udp", "icmp" or "all".
    pub protocol: String,
    pub from_port: String,
    pub to_port: String,
    pub cidr: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SecurityGroupRequest {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub rules: Vec<SecurityRule>,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SecurityGroupInfo {
    pub iid: Iid,
    pub vpc_iid: Iid,
    pub rules: Vec<SecurityRule>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[async_trait]
pub trait SecurityGroupHandler: Send + Sync {
    async fn create_security_group(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo, EngineError>;
    async fn list_security_group(&self) -> Result<Vec<SecurityGroupInfo>, EngineError>;
    async fn get_security_group(&self, iid: &Iid) -> Result<SecurityGroupInfo, EngineError>;
    async fn delete_security_group(&self, iid: &Iid) -> Result<(), EngineError>;
    async fn add_rules(&self, iid: &Iid, rules: &[SecurityRule]) -> Result<SecurityGroupInfo, EngineError>;
    async fn remove_rules(&self, iid: &Iid, rules: &[SecurityRule]) -> Result<(), EngineError>;
}
