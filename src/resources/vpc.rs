use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VpcRequest {
    pub iid: Iid,
    pub ipv4_cidr: String,
    pub subnets: Vec<SubnetRequest>,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SubnetRequest {
    pub iid: Iid,
    pub zone: String,
    pub ipv4_cidr: String,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VpcInfo {
    pub iid: Iid,
    pub ipv4_cidr: String,
    pub subnets: Vec<SubnetInfo>,
    pub status: VpcStatus,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SubnetInfo {
    pub iid: Iid,
    pub zone: String,
    pub ipv4_cidr: String,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum VpcStatus {
    Creating,
    Available,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl VpcStatus {
    pub fn from_provider(raw: &str) -> VpcStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, VpcStatus::Available | VpcStatus::Error)
    }
}

#[async_trait]
pub trait VpcHandler: Send + Sync {
    /// Creates the VPC shell only; subnets are separate coordinator steps.
    async fn create_vpc(&self, request: VpcRequest) -> Result<VpcInfo, EngineError>;
    async fn list_vpc(&self) -> Result<Vec<VpcInfo>, EngineError>;
    async fn get_vpc(&self, iid: &Iid) -> Result<VpcInfo, EngineError>;
    async fn get_vpc_status(&self, iid: &Iid) -> Result<VpcStatus, EngineError>;
    async fn delete_vpc(&self, iid: &Iid) -> Result<(), EngineError>;
    async fn add_subnet(&self, vpc_iid: &Iid, subnet: SubnetRequest) -> Result<SubnetInfo, EngineError>;
    async fn remove_subnet(&self, vpc_iid: &Iid, subnet_iid: &Iid) -> Result<(), EngineError>;
}
