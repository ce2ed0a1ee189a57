// Hive Logging
//
// The daemon has no GUI shell to lean on for log rotation, so this module
// implements a small `log::Log` backend: every record is written to a file
// under the home directory's `logs/` folder, rotated once it crosses
// LOG_MAX_BYTES, keeping LOG_MAX_BACKUPS old files around (`daemon.log.1`,
// `daemon.log.2`, ...). When `stderr` is true (interactive runs) records are
// also echoed there.

use crate::atoms::constants::{LOG_MAX_BACKUPS, LOG_MAX_BYTES};
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

struct RotatingFileLogger {
    path: PathBuf,
    file: Mutex<File>,
    echo_stderr: bool,
}

impl RotatingFileLogger {
    fn open(path: PathBuf, echo_stderr: bool) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            echo_stderr,
        })
    }

    fn rotate_if_needed(&self, file: &mut File) {
        let Ok(meta) = file.metadata() else { return };
        if meta.len() < LOG_MAX_BYTES {
            return;
        }
        for i in (1..LOG_MAX_BACKUPS).rev() {
            let from = backup_path(&self.path, i);
            let to = backup_path(&self.path, i + 1);
            if from.exists() {
                let _ = fs::rename(from, to);
            }
        }
        let _ = fs::rename(&self.path, backup_path(&self.path, 1));
        if let Ok(new_file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            *file = new_file;
        }
    }
}

fn backup_path(base: &Path, index: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl Log for RotatingFileLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!(
            "{} [{}] {}: {}\n",
            chrono::Utc::now().to_rfc3339(),
            record.level(),
            record.target(),
            record.args()
        );
        let mut file = self.file.lock();
        self.rotate_if_needed(&mut file);
        let _ = file.write_all(line.as_bytes());
        if self.echo_stderr {
            eprint!("{line}");
        }
    }

    fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// Initialize the process-wide logger. `log_path` is the target file
/// (typically `<home>/logs/daemon.log` or `.../watcher.log`); when `echo_stderr`
/// is set, every record is also printed to stderr for interactive runs.
pub fn init(log_path: PathBuf, echo_stderr: bool, level: LevelFilter) -> std::io::Result<()> {
    let logger = RotatingFileLogger::open(log_path, echo_stderr)?;
    log::set_max_level(level);
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_path_appends_index() {
        let base = PathBuf::from("/tmp/daemon.log");
        assert_eq!(backup_path(&base, 1), PathBuf::from("/tmp/daemon.log.1"));
        assert_eq!(backup_path(&base, 3), PathBuf::from("/tmp/daemon.log.3"));
    }

    #[test]
    fn rotating_logger_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.log");
        let logger = RotatingFileLogger::open(path.clone(), false).unwrap();
        assert!(path.parent().unwrap().exists());
        drop(logger);
    }
}
