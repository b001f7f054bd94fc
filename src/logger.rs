use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use chrono::Local;
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub static HOST_IDENTITY: Lazy<String> =
    Lazy::new(|| gethostname::gethostname().to_string_lossy().to_string());

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Error,
}

impl From<LogLevel> for tracing::level_filters::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
        }
    }
}

/// Log sink configuration, loaded from `$STRATUS_ROOT/log_conf.yaml` when
/// present. Any load or parse failure falls back to defaults: logging setup
/// must never abort the process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub log_file: bool,
    pub file: FileSinkConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FileSinkConfig {
    pub filename: PathBuf,
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: LogLevel::Info,
            log_file: false,
            file: FileSinkConfig::default(),
        }
    }
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        FileSinkConfig {
            filename: default_log_dir().join("calllog.log"),
            max_size_mb: 10,
            max_backups: 30,
            max_age_days: 30,
        }
    }
}

fn default_log_dir() -> PathBuf {
    if let Ok(root) = std::env::var("STRATUS_ROOT") {
        return PathBuf::from(root).join("log");
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stratus")
        .join("log")
}

impl LogConfig {
    pub fn load() -> LogConfig {
        let path = match std::env::var("STRATUS_ROOT") {
            Ok(root) => PathBuf::from(root).join("log_conf.yaml"),
            Err(_) => return LogConfig::default(),
        };
        LogConfig::try_load(&path).unwrap_or_default()
    }

    fn try_load(path: &Path) -> anyhow::Result<LogConfig> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Event formatter producing the engine's line format:
/// `[name].[host] <timestamp> (<weekday>) <caller>:<line> - <message>`
pub struct LineFormatter {
    logger_name: String,
}

impl LineFormatter {
    pub fn new(logger_name: &str) -> Self {
        LineFormatter {
            logger_name: logger_name.to_string(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let now = Local::now();
        write!(
            writer,
            "[{}].[{}] {} ({}) {}:{} - ",
            self.logger_name,
            HOST_IDENTITY.as_str(),
            now.format("%Y-%m-%d %H:%M:%S"),
            now.format("%A"),
            meta.file().unwrap_or_else(|| meta.target()),
            meta.line().unwrap_or(0),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Formats one sink line outside a tracing subscriber (file call log path).
pub fn format_line(logger_name: &str, caller: &str, message: &str) -> String {
    let now = Local::now();
    format!(
        "[{}].[{}] {} ({}) {} - {}\n",
        logger_name,
        HOST_IDENTITY.as_str(),
        now.format("%Y-%m-%d %H:%M:%S"),
        now.format("%A"),
        caller,
        message,
    )
}

/// Installs the process-wide subscriber for engine logs. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging(config: &LogConfig) -> Option<RotatingFileWriter> {
    let formatter = LineFormatter::new("stratus");
    if config.log_file {
        let writer = RotatingFileWriter::new(
            &config.file.filename,
            config.file.max_size_mb * 1024 * 1024,
            config.file.max_backups,
            Duration::from_secs(config.file.max_age_days * 24 * 3600),
        );
        let make_writer = writer.clone();
        let _ = tracing_subscriber::fmt()
            .event_format(formatter)
            .with_max_level(tracing::level_filters::LevelFilter::from(config.level))
            .with_writer(move || make_writer.clone())
            .try_init();
        Some(writer)
    } else {
        let _ = tracing_subscriber::fmt()
            .event_format(formatter)
            .with_max_level(tracing::level_filters::LevelFilter::from(config.level))
            .with_writer(std::io::stderr)
            .try_init();
        None
    }
}

/// Append-only log file with size-based rotation and backup culling by count
/// and age. Write and rotation failures are swallowed: the sink always
/// reports success to the wrapped operation.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFileInner>>,
}

struct RotatingFileInner {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    max_age: Duration,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl RotatingFileWriter {
    pub fn new(path: &Path, max_size: u64, max_backups: usize, max_age: Duration) -> Self {
        let written = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        RotatingFileWriter {
            inner: Arc::new(Mutex::new(RotatingFileInner {
                path: path.to_path_buf(),
                max_size,
                max_backups,
                max_age,
                writer: None,
                written,
            })),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, RotatingFileInner>> {
        self.inner.lock().map_err(|_| io::Error::other("Mutex lock failed"))
    }

    pub fn flush_all(&self) {
        if let Ok(mut inner) = self.lock() {
            if let Some(writer) = inner.writer.as_mut() {
                let _ = writer.flush();
            }
        }
    }
}

impl RotatingFileInner {
    fn open_if_necessary(&mut self) -> io::Result<()> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
            self.writer = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        // shift file.N -> file.N+1, dropping the oldest
        for index in (1..=self.max_backups).rev() {
            let from = self.backup_path(index);
            if !from.exists() {
                continue;
            }
            if index == self.max_backups {
                let _ = fs::remove_file(&from);
            } else {
                let _ = fs::rename(&from, self.backup_path(index + 1));
            }
        }
        if self.max_backups > 0 {
            fs::rename(&self.path, self.backup_path(1))?;
        } else {
            fs::remove_file(&self.path)?;
        }
        self.cull_aged_backups();
        self.written = 0;
        self.open_if_necessary()
    }

    fn cull_aged_backups(&self) {
        let now = SystemTime::now();
        for index in 1..=self.max_backups {
            let path = self.backup_path(index);
            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default() > self.max_age)
                .unwrap_or(false);
            if expired {
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn write_line(&mut self, buf: &[u8]) {
        if self.open_if_necessary().is_err() {
            return;
        }
        if self.written + buf.len() as u64 > self.max_size && self.rotate().is_err() {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            if writer.write_all(buf).is_ok() {
                self.written += buf.len() as u64;
                let _ = writer.flush();
            }
        }
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut inner) = self.lock() {
            inner.write_line(buf);
        }
        // Always returns Ok whatever happened to the underlying file.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotating_writer_rotates_on_size() {
        // setup:
        let dir = tempfile::tempdir().expect("cannot create temp dir");
        let path = dir.path().join("call.log");
        let mut writer = RotatingFileWriter::new(&path, 64, 3, Duration::from_secs(3600));

        // execute: enough lines to force at least one rotation
        for i in 0..16 {
            let line = format!("record number {i} with some padding\n");
            assert_eq!(writer.write(line.as_bytes()).unwrap(), line.len());
        }
        writer.flush_all();

        // verify:
        assert!(path.exists());
        assert!(dir.path().join("call.log.1").exists());
    }

    #[test]
    fn test_rotating_writer_never_fails_on_unwritable_path() {
        // setup: a path that cannot be created
        let path = PathBuf::from("/proc/stratus-does-not-exist/call.log");
        let mut writer = RotatingFileWriter::new(&path, 1024, 1, Duration::from_secs(3600));

        // execute & verify: write still reports success
        assert_eq!(writer.write(b"lost line\n").unwrap(), 10);
        assert!(writer.flush().is_ok());
    }

    #[test]
    fn test_rotating_writer_caps_backup_count() {
        let dir = tempfile::tempdir().expect("cannot create temp dir");
        let path = dir.path().join("call.log");
        let mut writer = RotatingFileWriter::new(&path, 16, 2, Duration::from_secs(3600));

        for _ in 0..12 {
            let _ = writer.write(b"0123456789abcdef\n");
        }
        writer.flush_all();

        assert!(dir.path().join("call.log.1").exists());
        assert!(dir.path().join("call.log.2").exists());
        assert!(!dir.path().join("call.log.3").exists());
    }

    #[test]
    fn test_format_line_shape() {
        let line = format_line("stratus", "Engine:start_vm()", "done");
        assert!(line.starts_with("[stratus].["));
        assert!(line.contains("Engine:start_vm() - done"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_log_config_defaults_without_root() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(!config.log_file);
        assert_eq!(config.file.max_backups, 30);
    }

    #[test]
    fn test_log_config_parses_partial_yaml() {
        // setup: a config file that only overrides some fields
        let raw = "level: error\nlog_file: true\nfile:\n  max_size_mb: 50\n";

        // execute:
        let config: LogConfig = serde_yaml::from_str(raw).expect("cannot parse log config");

        // verify: overrides land, the rest stays default
        assert_eq!(config.level, LogLevel::Error);
        assert!(config.log_file);
        assert_eq!(config.file.max_size_mb, 50);
        assert_eq!(config.file.max_backups, 30);
    }

    #[test]
    fn test_log_config_load_survives_broken_file() {
        let dir = tempfile::tempdir().expect("cannot create temp dir");
        let path = dir.path().join("log_conf.yaml");
        fs::write(&path, "level: [not, a, level").expect("cannot write config");
        assert!(LogConfig::try_load(&path).is_err());
        // the public path falls back to defaults instead of failing
        assert_eq!(LogConfig::try_load(&path).unwrap_or_default(), LogConfig::default());
    }
}
