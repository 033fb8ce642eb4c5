//! Tracing subscriber setup.
//!
//! Logs go to stderr, or to `concierge.log` in the configured directory.
//! On each start the log file is rotated (`concierge.log` → `.1` → `.2` →
//! `.3`, keeping the last 3) and reopened behind a line-flushing writer.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const LOG_FILE_NAME: &str = "concierge.log";
const KEEP_ROTATED: u32 = 3;

/// Install the global subscriber. Returns the log file path when logging to
/// a file. A subscriber installed earlier (e.g. by a test) is left in place.
pub fn init_tracing(config: &LogConfig) -> std::io::Result<Option<PathBuf>> {
    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("mcp_concierge=info,warn"));

    let (writer, log_path) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let log_path = dir.join(LOG_FILE_NAME);
            rotate_log_file(&log_path, KEEP_ROTATED);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;
            (BoxMakeWriter::new(FlushingWriter::new(file)), Some(log_path))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = log_path.is_none();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        return Ok(log_path);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path
            .as_deref()
            .map_or_else(|| "stderr".to_string(), |p| p.display().to_string()),
        pid = std::process::id(),
        "=== mcp-concierge starting ==="
    );
    Ok(log_path)
}

/// Rotate `base` → `base.1` → … → `base.{keep}`; the oldest is deleted.
/// Missing files in the chain are skipped.
fn rotate_log_file(base: &Path, keep: u32) {
    let numbered = |i: u32| PathBuf::from(format!("{}.{i}", base.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    if base.exists() {
        let _ = std::fs::rename(base, numbered(1));
    }
}

/// A file writer that flushes after every write, so each log line is on
/// disk even if the process dies.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
