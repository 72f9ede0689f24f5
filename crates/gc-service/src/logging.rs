//! Tracing setup for the GC service
//!
//! Logs go to stderr in the selected format and, when enabled in the cache
//! configuration, to a size-rotated file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
pub use tracing::Level;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Stderr output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Pretty-printed human-readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// Structured JSON format
    Json,
}

/// Log level options for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Show all logs (trace level)
    Trace,
    /// Show debug and above
    Debug,
    /// Show info and above (default)
    Info,
    /// Show warnings and above
    Warn,
    /// Show errors only
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Rotating log file settings
#[derive(Debug, Clone)]
pub struct LogFile {
    /// Live log file
    pub path: PathBuf,
    /// Rotate once the live file would exceed this size
    pub max_bytes: u64,
    /// Rotated files kept as `<path>.1 ..= <path>.N`
    pub backup_count: usize,
}

/// Initialize the global subscriber.
pub fn init_tracing(level: LogLevel, format: LogFormat, file: Option<&LogFile>) -> miette::Result<()> {
    let level = Level::from(level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "warn,media_cache={level},media_cache_gc={level}",
                level = level.as_str().to_lowercase()
            ))
        })
        .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"))?;

    let stderr_layer = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .boxed(),
    };

    let file_layer = match file {
        Some(cfg) => {
            let writer = RotatingFile::open(&cfg.path, cfg.max_bytes, cfg.backup_count).map_err(|e| {
                miette::miette!("Failed to open log file {}: {e}", cfg.path.display())
            })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(writer)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| miette::miette!("Failed to initialize tracing: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        format = ?format,
        log_file = ?file.map(|f| f.path.display().to_string()),
        "Tracing initialized for media-cache-gc"
    );
    Ok(())
}

/// Append-only log file that rotates by size.
///
/// Rotation shifts `log.1 .. log.N-1` up by one and moves the live file to
/// `log.1`; the oldest backup falls off. A live file removed from under the
/// service (by an operator or logrotate) is recreated on the next write.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open (or create) the live file, creating its directory.
    pub fn open(path: &Path, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let (file, written) = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    fn reopen(&mut self) -> io::Result<()> {
        let (file, written) = open_append(&self.path)?;
        self.file = file;
        self.written = written;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backup_count == 0 {
            fs::remove_file(&self.path).or_else(ignore_not_found)?;
        } else {
            for i in (1..self.backup_count).rev() {
                let from = backup_path(&self.path, i);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, i + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1)).or_else(ignore_not_found)?;
        }
        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.path.exists() {
            self.reopen()?;
        }
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let written = file.metadata()?.len();
    Ok((file, written))
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn ignore_not_found(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}
