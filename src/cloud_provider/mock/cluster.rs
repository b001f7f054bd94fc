use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::cloud_provider::mock::{MockBehavior, MockRegion};
use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::ResourceType;
use crate::resources::cluster::{
    ClusterAccessInfo, ClusterHandler, ClusterInfo, ClusterRequest, ClusterStatus, NodeGroupInfo, NodeGroupRequest,
    NodeGroupStatus,
};

pub struct MockNodeGroup {
    pub info: NodeGroupInfo,
    pub countdown: u32,
}

impl MockNodeGroup {
    fn tick(&mut self) -> NodeGroupStatus {
        if self.info.status == NodeGroupStatus::Creating {
            if self.countdown == 0 {
                self.info.status = NodeGroupStatus::Active;
                self.info.nodes = (0..self.info.desired_node_size.max(0))
                    .map(|i| Iid::synthetic(&format!("node-{}-{}", self.info.iid.system_id, i)))
                    .collect();
            } else {
                self.countdown -= 1;
            }
        }
        self.info.status
    }
}

pub struct MockCluster {
    pub info: ClusterInfo,
    pub node_groups: HashMap<String, MockNodeGroup>,
    pub countdown: u32,
}

impl MockCluster {
    fn tick(&mut self) -> ClusterStatus {
        match self.info.status {
            ClusterStatus::Creating | ClusterStatus::Updating => {
                if self.countdown == 0 {
                    self.info.status = ClusterStatus::Active;
                } else {
                    self.countdown -= 1;
                }
            }
            _ => {}
        }
        self.info.status
    }

    fn to_info(&mut self) -> ClusterInfo {
        self.tick();
        let mut info = self.info.clone();
        info.node_groups = self
            .node_groups
            .values_mut()
            .map(|group| {
                group.tick();
                group.info.clone()
            })
            .collect();
        info
    }
}

pub struct MockClusterHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl MockClusterHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>) -> Self {
        MockClusterHandler { region_state, behavior }
    }

    fn with_cluster<T>(
        &self,
        iid: &Iid,
        apply: impl FnOnce(&mut MockCluster) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut clusters = MockRegion::lock(&self.region_state.clusters, ResourceType::Cluster)?;
        let system_id = if !iid.system_id.is_empty() {
            iid.system_id.clone()
        } else {
            clusters
                .iter()
                .find(|(_, cluster)| cluster.info.iid.name_id == iid.name_id)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Cluster, &iid.to_string()))?
        };
        let cluster = clusters
            .get_mut(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::Cluster, &iid.to_string()))?;
        apply(cluster)
    }

    fn node_group<'a>(cluster: &'a mut MockCluster, iid: &Iid) -> Result<&'a mut MockNodeGroup, EngineError> {
        let system_id = if !iid.system_id.is_empty() {
            iid.system_id.clone()
        } else {
            cluster
                .node_groups
                .iter()
                .find(|(_, group)| group.info.iid.name_id == iid.name_id)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::NodeGroup, &iid.to_string()))?
        };
        cluster
            .node_groups
            .get_mut(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::NodeGroup, &iid.to_string()))
    }
}

#[async_trait]
impl ClusterHandler for MockClusterHandler {
    async fn create_cluster(&self, request: &ClusterRequest) -> Result<ClusterInfo, EngineError> {
        self.behavior
            .fail_if_armed("create_cluster", ResourceType::Cluster, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("cluster");
        let info = ClusterInfo {
            iid: Iid::new(&request.iid.name_id, &system_id),
            version: if request.version.is_empty() {
                "1.31".to_string()
            } else {
                request.version.clone()
            },
            network: request.network.clone(),
            node_groups: vec![],
            access_info: ClusterAccessInfo {
                endpoint: format!("https://{system_id}.k8s.mock.example:6443"),
                kubeconfig: format!("apiVersion: v1\nclusters:\n- name: {}\n", request.iid.name_id),
            },
            addons: vec![],
            status: ClusterStatus::Creating,
            created_at: Utc::now(),
            tags: request.tags.clone(),
            key_values: vec![],
        };
        let mut clusters = MockRegion::lock(&self.region_state.clusters, ResourceType::Cluster)?;
        clusters.insert(
            system_id,
            MockCluster {
                info: info.clone(),
                node_groups: HashMap::new(),
                countdown: self.behavior.settle_after_polls,
            },
        );
        Ok(info)
    }

    async fn list_cluster(&self) -> Result<Vec<ClusterInfo>, EngineError> {
        let mut clusters = MockRegion::lock(&self.region_state.clusters, ResourceType::Cluster)?;
        Ok(clusters.values_mut().map(|cluster| cluster.to_info()).collect())
    }

    async fn get_cluster(&self, iid: &Iid) -> Result<ClusterInfo, EngineError> {
        self.with_cluster(iid, |cluster| Ok(cluster.to_info()))
    }

    async fn get_cluster_status(&self, iid: &Iid) -> Result<ClusterStatus, EngineError> {
        self.with_cluster(iid, |cluster| Ok(cluster.tick()))
    }

    async fn delete_cluster(&self, iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_cluster", ResourceType::Cluster, &iid.name_id)?;
        let mut clusters = MockRegion::lock(&self.region_state.clusters, ResourceType::Cluster)?;
        let system_id = if !iid.system_id.is_empty() {
            iid.system_id.clone()
        } else {
            clusters
                .iter()
                .find(|(_, cluster)| cluster.info.iid.name_id == iid.name_id)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Cluster, &iid.to_string()))?
        };
        clusters.remove(&system_id);
        Ok(())
    }

    async fn add_node_group(
        &self,
        cluster_iid: &Iid,
        request: &NodeGroupRequest,
    ) -> Result<NodeGroupInfo, EngineError> {
        self.behavior
            .fail_if_armed("add_node_group", ResourceType::NodeGroup, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("ng");
        let settle = self.behavior.settle_after_polls;
        let request = request.clone();
        self.with_cluster(cluster_iid, move |cluster| {
            let info = NodeGroupInfo {
                iid: Iid::new(&request.iid.name_id, &system_id),
                vm_spec_name: request.vm_spec_name.clone(),
                root_disk_type: request.root_disk_type.clone(),
                root_disk_size: request.root_disk_size.clone(),
                key_pair_iid: request.key_pair_iid.clone(),
                on_auto_scaling: request.on_auto_scaling,
                desired_node_size: request.desired_node_size,
                min_node_size: request.min_node_size,
                max_node_size: request.max_node_size,
                status: NodeGroupStatus::Creating,
                nodes: vec![],
                key_values: vec![],
            };
            cluster.node_groups.insert(
                system_id.clone(),
                MockNodeGroup {
                    info: info.clone(),
                    countdown: settle,
                },
            );
            Ok(info)
        })
    }

    async fn remove_node_group(&self, cluster_iid: &Iid, node_group_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("remove_node_group", ResourceType::NodeGroup, &node_group_iid.name_id)?;
        let node_group_iid = node_group_iid.clone();
        self.with_cluster(cluster_iid, move |cluster| {
            let system_id = Self::node_group(cluster, &node_group_iid)?.info.iid.system_id.clone();
            cluster.node_groups.remove(&system_id);
            Ok(())
        })
    }

    async fn get_node_group_status(
        &self,
        cluster_iid: &Iid,
        node_group_iid: &Iid,
    ) -> Result<NodeGroupStatus, EngineError> {
        let node_group_iid = node_group_iid.clone();
        self.with_cluster(cluster_iid, move |cluster| {
            Ok(Self::node_group(cluster, &node_group_iid)?.tick())
        })
    }

    async fn set_node_group_auto_scaling(
        &self,
        cluster_iid: &Iid,
        node_group_iid: &Iid,
        on: bool,
    ) -> Result<(), EngineError> {
        let node_group_iid = node_group_iid.clone();
        self.with_cluster(cluster_iid, move |cluster| {
            Self::node_group(cluster, &node_group_iid)?.info.on_auto_scaling = on;
            Ok(())
        })
    }

    async fn change_node_group_scaling(
        &self,
        cluster_iid: &Iid,
        node_group_iid: &Iid,
        desired: i32,
        min: i32,
        max: i32,
    ) -> Result<NodeGroupInfo, EngineError> {
        let node_group_iid = node_group_iid.clone();
        self.with_cluster(cluster_iid, move |cluster| {
            let group = Self::node_group(cluster, &node_group_iid)?;
            if !group.info.on_auto_scaling {
                return Err(EngineError::new_validation(format!(
                    "node group {} has auto scaling disabled",
                    group.info.iid
                )));
            }
            group.info.desired_node_size = desired;
            group.info.min_node_size = min;
            group.info.max_node_size = max;
            group.info.nodes = (0..desired.max(0))
                .map(|i| Iid::synthetic(&format!("node-{}-{}", group.info.iid.system_id, i)))
                .collect();
            Ok(group.info.clone())
        })
    }

    async fn upgrade_cluster(&self, iid: &Iid, version: &str) -> Result<ClusterInfo, EngineError> {
        self.behavior
            .fail_if_armed("upgrade_cluster", ResourceType::Cluster, &iid.name_id)?;
        let version = version.to_string();
        let settle = self.behavior.settle_after_polls;
        self.with_cluster(iid, move |cluster| {
            cluster.info.version = version;
            cluster.info.status = ClusterStatus::Updating;
            cluster.countdown = settle;
            Ok(cluster.to_info())
        })
    }
}
