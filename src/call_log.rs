use std::io::Write;
use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::Serialize;

use crate::cloud_provider::Kind;
use crate::logger::{RotatingFileWriter, format_line};
use crate::resources::ResourceType;

/// Starts the stopwatch for one adapter call.
pub fn start() -> Instant {
    Instant::now()
}

pub fn elapsed(start: Instant) -> Duration {
    start.elapsed()
}

/// One line of the call log, emitted once per engine operation.
/// Purely observational; never consulted for control decisions.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub provider: Kind,
    pub region_zone: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub api_name: String,
    pub elapsed: Option<Duration>,
    pub error_message: String,
}

impl CallRecord {
    pub fn new(
        provider: Kind,
        region_zone: &str,
        resource_type: ResourceType,
        resource_name: &str,
        api_name: &str,
    ) -> Self {
        CallRecord {
            provider,
            region_zone: region_zone.to_string(),
            resource_type,
            resource_name: resource_name.to_string(),
            api_name: api_name.to_string(),
            elapsed: None,
            error_message: String::new(),
        }
    }

    pub fn succeeded(mut self, start: Instant) -> Self {
        self.elapsed = Some(elapsed(start));
        self
    }

    pub fn failed(mut self, start: Instant, error_message: &str) -> Self {
        self.elapsed = Some(elapsed(start));
        self.error_message = error_message.to_string();
        self
    }

    fn elapsed_seconds(&self) -> String {
        match self.elapsed {
            Some(duration) => format!("{:.4}", duration.as_secs_f64()),
            None => String::new(),
        }
    }

    pub fn message(&self) -> String {
        [
            ("Provider", self.provider.to_string()),
            ("RegionZone", self.region_zone.clone()),
            ("ResourceType", self.resource_type.to_string()),
            ("ResourceName", self.resource_name.clone()),
            ("ApiName", self.api_name.clone()),
            ("ElapsedTime", self.elapsed_seconds()),
            ("ErrorMSG", self.error_message.clone()),
        ]
        .iter()
        .map(|(field, value)| format!("\"{field}\" : \"{value}\""))
        .join(", ")
    }
}

/// Call-log sink. Implementations must never fail and never panic: a
/// telemetry failure must not abort the wrapped operation.
pub trait CallLogger: Send + Sync {
    fn log(&self, record: &CallRecord);
    fn clone_dyn(&self) -> Box<dyn CallLogger>;
}

impl Clone for Box<dyn CallLogger> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

/// Routes call records through the process tracing subscriber.
#[derive(Clone, Default)]
pub struct StdCallLogger {}

impl StdCallLogger {
    pub fn new() -> StdCallLogger {
        StdCallLogger {}
    }
}

impl CallLogger for StdCallLogger {
    fn log(&self, record: &CallRecord) {
        if record.error_message.is_empty() {
            tracing::info!(target: "calllog", "{}", record.message());
        } else {
            tracing::error!(target: "calllog", "{}", record.message());
        }
    }

    fn clone_dyn(&self) -> Box<dyn CallLogger> {
        Box::new(self.clone())
    }
}

/// Same sink as `StdCallLogger` but one JSON object per record, for log
/// collectors that ingest structured lines.
#[derive(Clone, Default)]
pub struct JsonCallLogger {}

impl JsonCallLogger {
    pub fn new() -> JsonCallLogger {
        JsonCallLogger {}
    }
}

impl CallLogger for JsonCallLogger {
    fn log(&self, record: &CallRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        if record.error_message.is_empty() {
            tracing::info!(target: "calllog", "{line}");
        } else {
            tracing::error!(target: "calllog", "{line}");
        }
    }

    fn clone_dyn(&self) -> Box<dyn CallLogger> {
        Box::new(self.clone())
    }
}

/// Writes call records to the rotating call-log file.
#[derive(Clone)]
pub struct FileCallLogger {
    logger_name: String,
    writer: RotatingFileWriter,
}

impl FileCallLogger {
    pub fn new(logger_name: &str, writer: RotatingFileWriter) -> Self {
        FileCallLogger {
            logger_name: logger_name.to_string(),
            writer,
        }
    }
}

impl CallLogger for FileCallLogger {
    fn log(&self, record: &CallRecord) {
        let line = format_line(&self.logger_name, &record.api_name, &record.message());
        // RotatingFileWriter swallows IO errors by contract.
        let _ = self.writer.clone().write_all(line.as_bytes());
    }

    fn clone_dyn(&self) -> Box<dyn CallLogger> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_std_call_logger_routes_through_tracing() {
        // setup:
        let record = CallRecord::new(
            Kind::Mock,
            "mock-region-1/zone-a",
            ResourceType::KeyPair,
            "key-01",
            "Engine:create_key_pair()",
        )
        .succeeded(start());

        // execute:
        StdCallLogger::new().log(&record);

        // verify:
        assert!(logs_contain("\"Provider\" : \"MOCK\""));
        assert!(logs_contain("Engine:create_key_pair()"));
    }

    #[traced_test]
    #[test]
    fn test_json_call_logger_emits_one_object_per_record() {
        let record = CallRecord::new(Kind::Mock, "r1", ResourceType::Vm, "vm-01", "Engine:start_vm()");
        JsonCallLogger::new().log(&record);
        assert!(logs_contain("\"provider\":\"MOCK\""));
    }

    #[test]
    fn test_call_record_message_renders_every_field() {
        // setup:
        let start = start();
        let record = CallRecord::new(
            Kind::Mock,
            "us-east-1/us-east-1a",
            ResourceType::Vm,
            "vm-01",
            "Engine:start_vm()",
        )
        .failed(start, "quota exceeded");

        // execute:
        let message = record.message();

        // verify:
        assert!(message.contains("\"Provider\" : \"MOCK\""));
        assert!(message.contains("\"RegionZone\" : \"us-east-1/us-east-1a\""));
        assert!(message.contains("\"ResourceType\" : \"VM\""));
        assert!(message.contains("\"ApiName\" : \"Engine:start_vm()\""));
        assert!(message.contains("\"ErrorMSG\" : \"quota exceeded\""));
    }

    #[test]
    fn test_success_record_has_empty_error() {
        let record =
            CallRecord::new(Kind::Mock, "r1", ResourceType::Disk, "disk-01", "Engine:create_disk()").succeeded(start());
        assert_eq!(record.error_message, "");
        assert!(!record.elapsed_seconds().is_empty());
    }
}
