use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::resources::KeyValue;
use crate::resources::RegionInfo;
use crate::resources::cluster::ClusterHandler;
use crate::resources::disk::DiskHandler;
use crate::resources::file_system::FileSystemHandler;
use crate::resources::image::ImageHandler;
use crate::resources::key_pair::KeyPairHandler;
use crate::resources::my_image::MyImageHandler;
use crate::resources::nlb::NlbHandler;
use crate::resources::security_group::SecurityGroupHandler;
use crate::resources::vm::VmHandler;
use crate::resources::vm_spec::VmSpecHandler;
use crate::resources::vpc::VpcHandler;

pub mod mock;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Aws,
    Azure,
    Gcp,
    OpenStack,
    Ncp,
    Mock,
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Kind::Aws => "AWS",
            Kind::Azure => "AZURE",
            Kind::Gcp => "GCP",
            Kind::OpenStack => "OPENSTACK",
            Kind::Ncp => "NCP",
            Kind::Mock => "MOCK",
        })
    }
}

/// Backend credential material. Field meaning is provider specific
/// (access key/secret, token, service-account JSON, ...); `extra` carries
/// whatever else a driver needs, including test-only switches.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderCredential {
    pub identity: String,
    pub secret: String,
    pub extra: Vec<KeyValue>,
}

impl ProviderCredential {
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

bitflags! {
    /// Resource kinds a driver can serve. A connection to a driver without
    /// a capability still answers the call, with `UnsupportedOperation`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capability: u32 {
        const VM = 1 << 0;
        const DISK = 1 << 1;
        const VPC = 1 << 2;
        const SECURITY_GROUP = 1 << 3;
        const NLB = 1 << 4;
        const CLUSTER = 1 << 5;
        const IMAGE = 1 << 6;
        const MY_IMAGE = 1 << 7;
        const KEY_PAIR = 1 << 8;
        const VM_SPEC = 1 << 9;
        const FILE_SYSTEM = 1 << 10;
    }
}

/// Backend driver: a factory of connections bound to one credential/region
/// pair. Drivers are registered at startup by name; adding a provider is a
/// registration call, never a core change.
pub trait CloudDriver: Send + Sync {
    fn kind(&self) -> Kind;
    fn capabilities(&self) -> Capability;

    /// Instantiates the backend client handles for one credential/region.
    /// Fails with `DriverLoad` on bad credentials or unreachable endpoints.
    fn connect(
        &self,
        credential: &ProviderCredential,
        region: &RegionInfo,
    ) -> Result<Arc<dyn CloudConnection>, EngineError>;
}

/// One instantiated adapter bundle. Handle accessors default to
/// `UnsupportedOperation` so every backend presents the full surface with a
/// uniform failure shape for the parts it cannot serve.
///
/// Connections are stateless wrappers over long-lived backend client
/// handles: safe to share across concurrent calls, never mutated per call.
pub trait CloudConnection: Send + Sync {
    fn kind(&self) -> Kind;
    fn region(&self) -> &RegionInfo;

    fn vm_handler(&self) -> Result<Arc<dyn VmHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "VmHandler"))
    }
    fn disk_handler(&self) -> Result<Arc<dyn DiskHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "DiskHandler"))
    }
    fn vpc_handler(&self) -> Result<Arc<dyn VpcHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "VpcHandler"))
    }
    fn security_group_handler(&self) -> Result<Arc<dyn SecurityGroupHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "SecurityGroupHandler"))
    }
    fn nlb_handler(&self) -> Result<Arc<dyn NlbHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "NlbHandler"))
    }
    fn cluster_handler(&self) -> Result<Arc<dyn ClusterHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "ClusterHandler"))
    }
    fn image_handler(&self) -> Result<Arc<dyn ImageHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "ImageHandler"))
    }
    fn my_image_handler(&self) -> Result<Arc<dyn MyImageHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "MyImageHandler"))
    }
    fn key_pair_handler(&self) -> Result<Arc<dyn KeyPairHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "KeyPairHandler"))
    }
    fn vm_spec_handler(&self) -> Result<Arc<dyn VmSpecHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "VmSpecHandler"))
    }
    fn file_system_handler(&self) -> Result<Arc<dyn FileSystemHandler>, EngineError> {
        Err(EngineError::new_unsupported_operation(self.kind(), "FileSystemHandler"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareConnection {
        region: RegionInfo,
    }

    impl CloudConnection for BareConnection {
        fn kind(&self) -> Kind {
            Kind::Ncp
        }
        fn region(&self) -> &RegionInfo {
            &self.region
        }
    }

    #[test]
    fn test_missing_capability_yields_uniform_unsupported_error() {
        // setup: a connection implementing no handler at all
        let connection = BareConnection {
            region: RegionInfo::new("kr-1", ""),
        };

        // execute & verify:
        match connection.nlb_handler() {
            Err(EngineError::UnsupportedOperation { provider, operation }) => {
                assert_eq!(provider, Kind::Ncp);
                assert_eq!(operation, "NlbHandler");
            }
            _ => panic!("expected UnsupportedOperation"),
        }
        assert!(matches!(
            connection.file_system_handler(),
            Err(EngineError::UnsupportedOperation { .. })
        ));
    }
}
