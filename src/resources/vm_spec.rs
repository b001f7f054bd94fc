use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::resources::KeyValue;

/// Instance flavour offered by a backend in one region (read-only catalog).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VmSpecInfo {
    pub region: String,
    pub name: String,
    pub vcpu_count: u32,
    pub vcpu_clock_ghz: String,
    pub memory_mb: u64,
    pub gpus: Vec<GpuInfo>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GpuInfo {
    pub count: u32,
    pub manufacturer: String,
    pub model: String,
    pub memory_mb: u64,
}

#[async_trait]
pub trait VmSpecHandler: Send + Sync {
    async fn list_vm_spec(&self) -> Result<Vec<VmSpecInfo>, EngineError>;
    async fn get_vm_spec(&self, name: &str) -> Result<VmSpecInfo, EngineError>;
}
