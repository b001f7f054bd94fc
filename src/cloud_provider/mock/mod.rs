use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cloud_provider::{Capability, CloudConnection, CloudDriver, Kind, ProviderCredential};
use crate::errors::{EngineError, ProviderError};
use crate::resources::cluster::ClusterHandler;
use crate::resources::disk::DiskHandler;
use crate::resources::file_system::FileSystemHandler;
use crate::resources::image::{ImageHandler, ImageInfo};
use crate::resources::key_pair::KeyPairHandler;
use crate::resources::my_image::MyImageHandler;
use crate::resources::nlb::NlbHandler;
use crate::resources::security_group::SecurityGroupHandler;
use crate::resources::vm::VmHandler;
use crate::resources::vm_spec::{VmSpecHandler, VmSpecInfo};
use crate::resources::vpc::VpcHandler;
use crate::resources::{KeyValue, RegionInfo, ResourceType};

mod cluster;
mod compute;
mod network;
mod storage;

pub use cluster::MockClusterHandler;
pub use compute::{MockImageHandler, MockKeyPairHandler, MockMyImageHandler, MockVmHandler, MockVmSpecHandler};
pub use network::{MockNlbHandler, MockSecurityGroupHandler, MockVpcHandler};
pub use storage::{MockDiskHandler, MockFileSystemHandler};

/// Credential `extra` key listing operations that must fail, comma separated.
/// Lets tests drive partial-failure paths (e.g. `create_health_monitor`).
pub const FAIL_POINTS_KEY: &str = "FailPoints";
/// Credential `extra` key: polls a resource stays in its transient creation
/// state before settling (default 0, settle immediately).
pub const SETTLE_AFTER_POLLS_KEY: &str = "SettleAfterPolls";

/// In-memory backend. One `MockRegion` per region name, shared by every
/// connection the driver hands out, so resources created through one
/// connection are visible to later ones the way a real backend behaves.
#[derive(Default)]
pub struct MockDriver {
    regions: Mutex<HashMap<String, Arc<MockRegion>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver::default()
    }
}

impl CloudDriver for MockDriver {
    fn kind(&self) -> Kind {
        Kind::Mock
    }

    fn capabilities(&self) -> Capability {
        Capability::all()
    }

    fn connect(
        &self,
        credential: &ProviderCredential,
        region: &RegionInfo,
    ) -> Result<Arc<dyn CloudConnection>, EngineError> {
        if credential.identity.is_empty() {
            return Err(EngineError::new_driver_load(
                Kind::Mock,
                "credential identity is empty".to_string(),
            ));
        }
        let shared = {
            let mut regions = self
                .regions
                .lock()
                .map_err(|_| EngineError::new_driver_load(Kind::Mock, "region table poisoned".to_string()))?;
            regions
                .entry(region.region.clone())
                .or_insert_with(|| Arc::new(MockRegion::new()))
                .clone()
        };
        let fail_points = credential
            .extra_value(FAIL_POINTS_KEY)
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let settle_after_polls = credential
            .extra_value(SETTLE_AFTER_POLLS_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        Ok(Arc::new(MockConnection {
            region: region.clone(),
            shared,
            behavior: Arc::new(MockBehavior {
                fail_points,
                settle_after_polls,
            }),
        }))
    }
}

/// Per-connection test behavior, resolved from the credential.
pub struct MockBehavior {
    fail_points: HashSet<String>,
    pub settle_after_polls: u32,
}

impl MockBehavior {
    pub fn fail_if_armed(&self, operation: &str, resource_type: ResourceType, resource_name: &str) -> Result<(), EngineError> {
        if self.fail_points.contains(operation) {
            return Err(EngineError::new_provider(
                operation,
                resource_type,
                resource_name,
                ProviderError::new_from_safe_message(format!("mock fail point `{operation}` armed")),
            ));
        }
        Ok(())
    }
}

pub struct MockConnection {
    region: RegionInfo,
    shared: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl CloudConnection for MockConnection {
    fn kind(&self) -> Kind {
        Kind::Mock
    }

    fn region(&self) -> &RegionInfo {
        &self.region
    }

    fn vm_handler(&self) -> Result<Arc<dyn VmHandler>, EngineError> {
        Ok(Arc::new(MockVmHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
            self.region.clone(),
        )))
    }

    fn disk_handler(&self) -> Result<Arc<dyn DiskHandler>, EngineError> {
        Ok(Arc::new(MockDiskHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
            self.region.clone(),
        )))
    }

    fn vpc_handler(&self) -> Result<Arc<dyn VpcHandler>, EngineError> {
        Ok(Arc::new(MockVpcHandler::new(self.shared.clone(), self.behavior.clone())))
    }

    fn security_group_handler(&self) -> Result<Arc<dyn SecurityGroupHandler>, EngineError> {
        Ok(Arc::new(MockSecurityGroupHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
        )))
    }

    fn nlb_handler(&self) -> Result<Arc<dyn NlbHandler>, EngineError> {
        Ok(Arc::new(MockNlbHandler::new(self.shared.clone(), self.behavior.clone())))
    }

    fn cluster_handler(&self) -> Result<Arc<dyn ClusterHandler>, EngineError> {
        Ok(Arc::new(MockClusterHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
        )))
    }

    fn image_handler(&self) -> Result<Arc<dyn ImageHandler>, EngineError> {
        Ok(Arc::new(MockImageHandler::new(self.shared.clone())))
    }

    fn my_image_handler(&self) -> Result<Arc<dyn MyImageHandler>, EngineError> {
        Ok(Arc::new(MockMyImageHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
        )))
    }

    fn key_pair_handler(&self) -> Result<Arc<dyn KeyPairHandler>, EngineError> {
        Ok(Arc::new(MockKeyPairHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
        )))
    }

    fn vm_spec_handler(&self) -> Result<Arc<dyn VmSpecHandler>, EngineError> {
        Ok(Arc::new(MockVmSpecHandler::new(self.region.clone())))
    }

    fn file_system_handler(&self) -> Result<Arc<dyn FileSystemHandler>, EngineError> {
        Ok(Arc::new(MockFileSystemHandler::new(
            self.shared.clone(),
            self.behavior.clone(),
        )))
    }
}

/// Region-wide backend state. Every table is keyed by system id.
pub struct MockRegion {
    sequence: AtomicU64,
    pub vms: Mutex<HashMap<String, compute::MockVm>>,
    pub my_images: Mutex<HashMap<String, compute::MockMyImage>>,
    pub key_pairs: Mutex<HashMap<String, crate::resources::key_pair::KeyPairInfo>>,
    pub images: Vec<ImageInfo>,
    pub disks: Mutex<HashMap<String, storage::MockDisk>>,
    pub file_systems: Mutex<HashMap<String, storage::MockFileSystem>>,
    pub clusters: Mutex<HashMap<String, cluster::MockCluster>>,
    pub vpcs: Mutex<HashMap<String, network::MockVpc>>,
    pub security_groups: Mutex<HashMap<String, crate::resources::security_group::SecurityGroupInfo>>,
    pub nlbs: Mutex<HashMap<String, network::MockNlb>>,
}

impl MockRegion {
    fn new() -> Self {
        MockRegion {
            sequence: AtomicU64::new(1),
            vms: Mutex::new(HashMap::new()),
            my_images: Mutex::new(HashMap::new()),
            key_pairs: Mutex::new(HashMap::new()),
            images: builtin_images(),
            disks: Mutex::new(HashMap::new()),
            file_systems: Mutex::new(HashMap::new()),
            clusters: Mutex::new(HashMap::new()),
            vpcs: Mutex::new(HashMap::new()),
            security_groups: Mutex::new(HashMap::new()),
            nlbs: Mutex::new(HashMap::new()),
        }
    }

    /// Backend-assigned opaque identifier, e.g. `i-0000000042`.
    pub fn next_system_id(&self, prefix: &str) -> String {
        format!("{prefix}-{:010}", self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    pub fn lock<'a, T>(table: &'a Mutex<T>, resource_type: ResourceType) -> Result<MutexGuard<'a, T>, EngineError> {
        table.lock().map_err(|_| {
            EngineError::new_provider(
                "Lock",
                resource_type,
                "",
                ProviderError::new_from_safe_message("mock region table poisoned".to_string()),
            )
        })
    }
}

fn builtin_images() -> Vec<ImageInfo> {
    [
        ("ubuntu-22.04", "Ubuntu 22.04 LTS"),
        ("ubuntu-24.04", "Ubuntu 24.04 LTS"),
        ("debian-12", "Debian 12"),
        ("windows-2022", "Windows Server 2022"),
    ]
    .into_iter()
    .map(|(id, os)| ImageInfo {
        iid: crate::iid::Iid::new(id, id),
        guest_os: os.to_string(),
        status: "available".to_string(),
        key_values: vec![KeyValue::new("Architecture", "x86_64")],
    })
    .collect()
}

pub(crate) fn builtin_vm_specs(region: &str) -> Vec<VmSpecInfo> {
    [
        ("mock.nano", 1, 512),
        ("mock.small", 2, 2048),
        ("mock.medium", 4, 8192),
        ("mock.large", 8, 16384),
    ]
    .into_iter()
    .map(|(name, vcpu, mem)| VmSpecInfo {
        region: region.to_string(),
        name: name.to_string(),
        vcpu_count: vcpu,
        vcpu_clock_ghz: "2.5".to_string(),
        memory_mb: mem,
        gpus: vec![],
        key_values: vec![],
    })
    .collect()
}
