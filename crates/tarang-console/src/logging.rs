use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Keeps the log file open for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl LogGuard {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct MultiWriter {
    stdout_enabled: bool,
    file: Option<Arc<Mutex<File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<File>>>, stdout_enabled: bool) -> Self {
        Self {
            stdout_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout_enabled {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout_enabled {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

pub fn log_file_path(log_dir: &str) -> PathBuf {
    PathBuf::from(log_dir).join(format!("tarang-console-{}.log", std::process::id()))
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard {
            file: None,
            path: None,
        });
    }
    std::fs::create_dir_all(log_dir)?;
    let path = log_file_path(log_dir);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
        path: Some(path),
    })
}

/// Installs the global subscriber. `RUST_LOG` wins over
/// `TARANG_LOG_LEVEL`, which wins over `info`.
pub fn init_logging(log_dir: &str, log_stdout: bool) -> Option<LogGuard> {
    let level = env::var("TARANG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard {
                file: None,
                path: None,
            }
        }
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), log_stdout));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn log_file_is_named_after_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("nested").to_string_lossy().to_string();
        let guard = open_log_file(&log_dir).expect("open");
        let path = guard.path().expect("path").to_path_buf();
        assert!(path.ends_with(format!("tarang-console-{}.log", std::process::id())));

        let mut writer = MultiWriter::new(guard.file.clone(), false);
        writer.write_all(b"realtime_connected\n").expect("write");
        writer.flush().expect("flush");

        let mut contents = String::new();
        File::open(&path)
            .expect("reopen")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "realtime_connected\n");
    }

    #[test]
    fn empty_log_dir_disables_file() {
        let guard = open_log_file("  ").expect("open");
        assert!(guard.path().is_none());
    }
}
