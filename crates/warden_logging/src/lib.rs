//! Shared logging utilities for Warden binaries.
//!
//! Two output layers (rolling log file, stderr) plus an in-memory ring
//! buffer that backs the `get_logs` RPC tool. File behaviour is driven by
//! the `LOG_*` environment variables:
//!
//! - `LOG_FILE` — log file path (default `<home>/logs/<app>.log`)
//! - `LOG_MAX_SIZE_MB` — size threshold before rotation/truncation
//! - `LOG_ROTATION_STRATEGY` — `rotate` (numbered siblings) or `truncate`
//! - `LOG_KEEP_FILES` — rotated files kept (rotate strategy only)
//! - `LOG_FORMAT` — `text` or `json`
//! - `MCP_SHELL_LOG_LEVEL` — error | warn | info | debug

mod buffer;

pub use buffer::{LogBuffer, LogQuery, LogRecord};

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "warden=info,warden_mcp=info,warden_worker=info,warden_security=info";
const DEFAULT_MAX_LOG_FILES: usize = 5;
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// How a full log file is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Shift to numbered siblings, keeping `keep_files` of them.
    Rotate,
    /// Reset the file to zero length in place.
    Truncate,
}

/// Logging configuration shared by Warden binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing and return the capture buffer for `get_logs`.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogBuffer> {
    let path = log_file_path(config.app_name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    let max_size = std::env::var("LOG_MAX_SIZE_MB")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|mb| mb * 1024 * 1024)
        .unwrap_or(DEFAULT_MAX_LOG_SIZE);
    let keep_files = std::env::var("LOG_KEEP_FILES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_LOG_FILES);
    let strategy = match std::env::var("LOG_ROTATION_STRATEGY").as_deref() {
        Ok("truncate") => RotationStrategy::Truncate,
        _ => RotationStrategy::Rotate,
    };
    let json_format = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));

    let file_writer = SharedRollingWriter::new(path, strategy, keep_files, max_size)
        .context("Failed to initialize rolling log writer")?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match std::env::var("MCP_SHELL_LOG_LEVEL").as_deref() {
            Ok(level @ ("error" | "warn" | "info" | "debug")) => EnvFilter::new(level),
            _ => EnvFilter::new(DEFAULT_LOG_FILTER),
        }
    });

    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    let buffer = LogBuffer::default();

    let text_file_layer = (!json_format).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(file_writer.clone())
            .with_ansi(false)
    });
    let json_file_layer = json_format.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(buffer.layer())
        .with(text_file_layer.with_filter(file_filter.clone()))
        .with(json_file_layer.with_filter(file_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(buffer)
}

/// Resolve the log file path: `LOG_FILE`, else `<home>/logs/<app>.log`.
fn log_file_path(app_name: &str) -> PathBuf {
    if let Ok(path) = std::env::var("LOG_FILE") {
        return PathBuf::from(path);
    }
    warden_home().join("logs").join(format!("{}.log", sanitize_name(app_name)))
}

/// Resolve the Warden home directory (WARDEN_HOME, else ~/.warden).
fn warden_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("WARDEN_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".warden"))
        .unwrap_or_else(|| PathBuf::from(".").join(".warden"))
}

struct RollingFileAppender {
    path: PathBuf,
    strategy: RotationStrategy,
    keep_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(
        path: PathBuf,
        strategy: RotationStrategy,
        keep_files: usize,
        max_size: u64,
    ) -> io::Result<Self> {
        let mut appender = Self {
            path,
            strategy,
            keep_files: keep_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.roll()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        match self.strategy {
            RotationStrategy::Truncate => {
                if let Some(file) = self.file.as_mut() {
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                    self.current_size = 0;
                }
                Ok(())
            }
            RotationStrategy::Rotate => {
                if let Some(mut file) = self.file.take() {
                    let _ = file.flush();
                }
                self.rotate_files()?;
                let (file, size) = self.open_current_file()?;
                self.file = Some(file);
                self.current_size = size;
                Ok(())
            }
        }
    }

    fn rotate_files(&self) -> io::Result<()> {
        let max_index = self.keep_files.saturating_sub(1);
        if max_index == 0 {
            // keep_files == 1: recycle the live file.
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let oldest = self.rotated_path(max_index);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for idx in (1..max_index).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                fs::rename(&src, self.rotated_path(idx + 1))?;
            }
        }

        if self.path.exists() {
            fs::rename(&self.path, self.rotated_path(1))?;
        }

        Ok(())
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.roll()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(
        path: PathBuf,
        strategy: RotationStrategy,
        keep_files: usize,
        max_size: u64,
    ) -> Result<Self> {
        let appender = RollingFileAppender::new(path.clone(), strategy, keep_files, max_size)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotation_shifts_numbered_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("warden.log");
        let mut appender =
            RollingFileAppender::new(path.clone(), RotationStrategy::Rotate, 3, 16).unwrap();

        appender.write_all(b"0123456789abcdef").unwrap();
        appender.write_all(b"next file now").unwrap();
        appender.flush().unwrap();

        assert!(path.exists());
        assert!(temp.path().join("warden.log.1").exists());
    }

    #[test]
    fn truncate_resets_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("warden.log");
        let mut appender =
            RollingFileAppender::new(path.clone(), RotationStrategy::Truncate, 3, 16).unwrap();

        appender.write_all(b"0123456789abcdef").unwrap();
        appender.write_all(b"fresh").unwrap();
        appender.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "fresh");
        assert!(!temp.path().join("warden.log.1").exists());
    }
}
