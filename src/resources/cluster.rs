use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::KeyValue;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterNetwork {
    pub vpc_iid: Iid,
    pub subnet_iids: Vec<Iid>,
    pub security_group_iids: Vec<Iid>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NodeGroupRequest {
    pub iid: Iid,
    pub vm_spec_name: String,
    pub root_disk_type: String,
    pub root_disk_size: String,
    pub key_pair_iid: Iid,
    pub on_auto_scaling: bool,
    pub desired_node_size: i32,
    pub min_node_size: i32,
    pub max_node_size: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NodeGroupInfo {
    pub iid: Iid,
    pub vm_spec_name: String,
    pub root_disk_type: String,
    pub root_disk_size: String,
    pub key_pair_iid: Iid,
    pub on_auto_scaling: bool,
    pub desired_node_size: i32,
    pub min_node_size: i32,
    pub max_node_size: i32,
    pub status: NodeGroupStatus,
    pub nodes: Vec<Iid>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterRequest {
    pub iid: Iid,
    pub version: String,
    pub network: ClusterNetwork,
    pub node_groups: Vec<NodeGroupRequest>,
    pub tags: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterAccessInfo {
    pub endpoint: String,
    pub kubeconfig: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClusterInfo {
    pub iid: Iid,
    pub version: String,
    pub network: ClusterNetwork,
    pub node_groups: Vec<NodeGroupInfo>,
    pub access_info: ClusterAccessInfo,
    pub addons: Vec<KeyValue>,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum ClusterStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl ClusterStatus {
    pub fn from_provider(raw: &str) -> ClusterStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, ClusterStatus::Active | ClusterStatus::Error)
    }

    pub fn is_update_terminal(&self) -> bool {
        matches!(self, ClusterStatus::Active | ClusterStatus::Inactive | ClusterStatus::Error)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum NodeGroupStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl NodeGroupStatus {
    pub fn from_provider(raw: &str) -> NodeGroupStatus {
        raw.parse().unwrap_or_default()
    }

    pub fn is_create_terminal(&self) -> bool {
        matches!(self, NodeGroupStatus::Active | NodeGroupStatus::Error)
    }
}

/// Provider-managed Kubernetes clusters.
#[async_trait]
pub trait ClusterHandler: Send + Sync {
    /// Creates the control plane only; node groups are coordinator steps.
    async fn create_cluster(&self, request: &ClusterRequest) -> Result<ClusterInfo, EngineError>;
    async fn list_cluster(&self) -> Result<Vec<ClusterInfo>, EngineError>;
    async fn get_cluster(&self, iid: &Iid) -> Result<ClusterInfo, EngineError>;
    async fn get_cluster_status(&self, iid: &Iid) -> Result<ClusterStatus, EngineError>;
    async fn delete_cluster(&self, iid: &Iid) -> Result<(), EngineError>;

    async fn add_node_group(&self, cluster_iid: &Iid, request: &NodeGroupRequest)
    -> Result<NodeGroupInfo, EngineError>;
    async fn remove_node_group(&self, cluster_iid: &Iid, node_group_iid: &Iid) -> Result<(), EngineError>;
    async fn get_node_group_status(&self, cluster_iid: &Iid, node_group_iid: &Iid)
    -> Result<NodeGroupStatus, EngineError>;
    async fn set_node_group_auto_scaling(
        &self,
        cluster_iid: &Iid,
        node_group_iid: &Iid,
        on: bool,
    ) -> Result<(), EngineError>;
    async fn change_node_group_scaling(
        &self,
        cluster_iid: &Iid,
        node_group_iid: &Iid,
        desired: i32,
        min: i32,
        max: i32,
    ) -> Result<NodeGroupInfo, EngineError>;

    async fn upgrade_cluster(&self, iid: &Iid, version: &str) -> Result<ClusterInfo, EngineError>;
}
