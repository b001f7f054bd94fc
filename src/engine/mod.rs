use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::call_log::{CallLogger, CallRecord, StdCallLogger};
use crate::connection::{ConnectionBundle, ConnectionManager};
use crate::errors::EngineError;
use crate::iid::{Iid, derive_original_name};
use crate::reconciler::PollBudget;
use crate::resources::ResourceType;

mod cluster;
mod disk;
mod file_system;
mod image;
mod key_pair;
mod my_image;
mod nlb;
mod security_group;
mod vm;
mod vm_spec;
mod vpc;

pub use vm::VmAction;

static RESOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,62}$").expect("cannot compile resource name regex"));

/// Per-resource-kind reconciliation budgets. Defaults reflect observed
/// cold-start latencies: block storage and VPCs settle in seconds, managed
/// clusters in tens of minutes.
#[derive(Clone, Copy, Debug)]
pub struct PollBudgets {
    pub vm_boot: PollBudget,
    pub vm_terminate: PollBudget,
    pub disk_create: PollBudget,
    pub vpc_create: PollBudget,
    pub nlb_create: PollBudget,
    pub cluster_create: PollBudget,
    pub node_group: PollBudget,
    pub my_image: PollBudget,
    pub file_system: PollBudget,
}

impl Default for PollBudgets {
    fn default() -> Self {
        PollBudgets {
            vm_boot: PollBudget::new(Duration::from_secs(5), 500),
            vm_terminate: PollBudget::new(Duration::from_secs(2), 120),
            disk_create: PollBudget::new(Duration::from_secs(2), 500),
            vpc_create: PollBudget::new(Duration::from_secs(2), 500),
            nlb_create: PollBudget::new(Duration::from_secs(5), 240),
            cluster_create: PollBudget::new(Duration::from_secs(10), 240),
            node_group: PollBudget::new(Duration::from_secs(10), 240),
            my_image: PollBudget::new(Duration::from_secs(5), 240),
            file_system: PollBudget::new(Duration::from_secs(5), 240),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub budgets: PollBudgets,
    /// Overall per-call deadline applied when the caller does not pass one.
    pub default_deadline: Option<Duration>,
}

/// The control plane core: resolves connections, routes normalized calls to
/// adapter handlers, reconciles asynchronous provisioning and supervises
/// compensating rollback. One instance serves many concurrent callers; the
/// only shared mutable state is the connection bundle cache.
pub struct Engine {
    connections: ConnectionManager,
    config: EngineConfig,
    call_logger: Box<dyn CallLogger>,
}

impl Engine {
    pub fn new(connections: ConnectionManager, config: EngineConfig, call_logger: Box<dyn CallLogger>) -> Self {
        Engine {
            connections,
            config,
            call_logger,
        }
    }

    pub fn with_defaults(connections: ConnectionManager) -> Self {
        Engine::new(connections, EngineConfig::default(), Box::new(StdCallLogger::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn bundle(&self, connection_name: &str) -> Result<Arc<ConnectionBundle>, Box<EngineError>> {
        self.connections.resolve(connection_name).map_err(Box::new)
    }

    pub(crate) fn deadline(&self, caller_deadline: Option<Duration>) -> Option<Duration> {
        caller_deadline.or(self.config.default_deadline)
    }

    /// Emits one call record. Telemetry is observational only: whatever the
    /// sink does, the wrapped operation's outcome is untouched.
    pub(crate) fn emit<T>(
        &self,
        record: CallRecord,
        started: Instant,
        result: &Result<T, Box<EngineError>>,
    ) {
        let record = match result {
            Ok(_) => record.succeeded(started),
            Err(err) => record.failed(started, &err.to_string()),
        };
        let _ = catch_unwind(AssertUnwindSafe(|| self.call_logger.log(&record)));
    }

    pub(crate) fn record(
        &self,
        bundle: &ConnectionBundle,
        resource_type: ResourceType,
        resource_name: &str,
        api_name: &str,
    ) -> CallRecord {
        CallRecord::new(
            bundle.provider,
            &bundle.region.region_zone(),
            resource_type,
            resource_name,
            &format!("Engine:{api_name}()"),
        )
    }
}

/// Fails fast on names no backend would accept, before any provider call.
pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if RESOURCE_NAME.is_match(name) {
        return Ok(());
    }
    Err(EngineError::new_validation(format!(
        "resource name `{name}` must be 1-63 characters of [A-Za-z0-9._-]"
    )))
}

/// Stamps a backend identity with the caller-facing name: the original name
/// recovered from the encoded one, or a synthetic placeholder when the
/// backend never had a name for it.
pub(crate) fn stamp(iid: &Iid) -> Iid {
    if iid.name_id.is_empty() {
        return Iid::synthetic(&iid.system_id);
    }
    Iid::new(&derive_original_name(&iid.name_id), &iid.system_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("vm-01").is_ok());
        assert!(validate_name("Web.Frontend_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_stamp_recovers_display_name() {
        let encoded = crate::iid::encode_name("vm-01");
        assert_eq!(stamp(&Iid::new(&encoded, "i-1")), Iid::new("vm-01", "i-1"));
        assert_eq!(stamp(&Iid::from_system_id("vol-9")).name_id, "auto-vol-9");
    }
}
