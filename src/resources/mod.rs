use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod disk;
pub mod file_system;
pub mod image;
pub mod key_pair;
pub mod my_image;
pub mod nlb;
pub mod security_group;
pub mod vm;
pub mod vm_spec;
pub mod vpc;

/// Resource kinds addressable through the normalized API.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Image,
    VmSpec,
    Vpc,
    Subnet,
    SecurityGroup,
    KeyPair,
    Vm,
    Disk,
    MyImage,
    Nlb,
    Cluster,
    NodeGroup,
    FileSystem,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResourceType::Image => "VMIMAGE",
            ResourceType::VmSpec => "VMSPEC",
            ResourceType::Vpc => "VPC/SUBNET",
            ResourceType::Subnet => "SUBNET",
            ResourceType::SecurityGroup => "SECURITYGROUP",
            ResourceType::KeyPair => "VMKEYPAIR",
            ResourceType::Vm => "VM",
            ResourceType::Disk => "DISK",
            ResourceType::MyImage => "MYIMAGE",
            ResourceType::Nlb => "NETWORKLOADBALANCER",
            ResourceType::Cluster => "CLUSTER",
            ResourceType::NodeGroup => "NODEGROUP",
            ResourceType::FileSystem => "FILESYSTEM",
        })
    }
}

/// Free-form key/value pair carried on requests and backend resources.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: &str, value: &str) -> Self {
        KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionInfo {
    pub region: String,
    pub zone: String,
}

impl RegionInfo {
    pub fn new(region: &str, zone: &str) -> Self {
        RegionInfo {
            region: region.to_string(),
            zone: zone.to_string(),
        }
    }

    /// `region/zone` rendering used by the call log.
    pub fn region_zone(&self) -> String {
        if self.zone.is_empty() {
            self.region.clone()
        } else {
            format!("{}/{}", self.region, self.zone)
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[default]
    LinuxUnix,
    Windows,
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Platform::LinuxUnix => "LINUX/UNIX",
            Platform::Windows => "WINDOWS",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    #[default]
    PublicImage,
    MyImage,
}
