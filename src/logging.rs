//! Operational log sinks.
//!
//! Library code reports diagnostics through the `log` macros. The per-program
//! operation log (one timestamped line per event) is written through a
//! [`LogSink`] handed to the server or client at construction time.
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::Local;
use log::{error, info};
use parking_lot::Mutex;

use crate::sync::ThreadLock;

/// Serialises appends from every [`FileLog`] in the process.
static APPEND_LOCK: LazyLock<ThreadLock> = LazyLock::new(ThreadLock::new);

/// Destination for operation log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, message: &str);
}

/// Appends `<timestamp>,<message>` lines to `<log_dir>/<program>.log`.
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    /// Only the file name part of `program` is used, so a full executable
    /// path maps to the same log file as its bare name.
    pub fn new(log_dir: impl AsRef<Path>, program: &str) -> Self {
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());
        Self {
            path: log_dir.as_ref().join(format!("{name}.log")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_write(&self, message: &str) -> io::Result<()> {
        let line = format!("{},{message}\n", timestamp());
        let _locker = APPEND_LOCK.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl LogSink for FileLog {
    fn write(&self, message: &str) {
        if let Err(e) = self.try_write(message) {
            error!("couldn't append to {}: {e}", self.path.display());
        }
    }
}

/// Forwards lines to the `log` facade at info level.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn write(&self, message: &str) {
        info!("{message}");
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemoryLog {
    fn write(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }
}

#[derive(Debug, Clone, Default)]
pub struct NullLog;

impl LogSink for NullLog {
    fn write(&self, _message: &str) {}
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn program_path_reduced_to_file_name() {
        let log = FileLog::new("/var/log", "/usr/local/bin/echo_server");
        assert_eq!(log.path(), Path::new("/var/log/echo_server.log"));
    }

    #[test]
    fn appends_timestamped_lines() {
        let temp = TempDir::new("filelog").unwrap();
        let log = FileLog::new(temp.path(), "app");

        log.try_write("first").unwrap();
        log.write("second");

        let contents = fs::read_to_string(temp.path().join("app.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",first"));
        assert!(lines[1].ends_with(",second"));
        // e.g. 2024-01-31 12:00:00.123456
        let (stamp, _) = lines[0].split_once(',').unwrap();
        assert_eq!(stamp.len(), 26);
    }

    #[test]
    fn concurrent_writers_do_not_interleave() {
        let temp = TempDir::new("filelog").unwrap();
        let log = Arc::new(FileLog::new(temp.path(), "shared"));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for j in 0..25 {
                        log.write(&format!("writer-{i}-line-{j}"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 200);
        assert!(contents.lines().all(|l| l.contains(",writer-")));
    }

    #[test]
    fn missing_directory_is_reported_not_raised() {
        let log = FileLog::new("/nonexistent/netcore/dir", "app");
        assert!(log.try_write("x").is_err());
        log.write("x");
    }

    #[test]
    fn memory_log_collects() {
        let log = MemoryLog::new();
        log.write("hello world");
        assert!(log.contains("world"));
        assert_eq!(log.lines().len(), 1);
    }
}
