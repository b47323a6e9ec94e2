use anyhow::{Context, Result};
use chrono::Local;
use env_logger::{Builder, Env, Target};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Duplicates every log record to stderr and a file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

pub fn log_file_path(log_dir: &Path, study_name: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    log_dir.join(format!("{study_name}_{stamp}.log"))
}

/// Installs the global logger: `RUST_LOG` filter (default `info`), output to
/// stderr plus `<log_dir>/<study>_<timestamp>.log`. Returns the log file path.
pub fn init(log_dir: &Path, study_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_file_path(log_dir, study_name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init()
        .context("Logger was already initialized")?;
    Ok(path)
}

/// Stderr-only logger for runs that fail before the configuration is known.
pub fn init_stderr_only() {
    let _ = Builder::from_env(Env::default().default_filter_or("info")).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_named_after_study() {
        let path = log_file_path(Path::new("logs"), "Wednesday");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Wednesday_"));
        assert!(name.ends_with(".log"));
        assert_eq!(path.parent(), Some(Path::new("logs")));
    }

    #[test]
    fn tee_writer_copies_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut writer = TeeWriter {
            file: File::create(&path).unwrap(),
        };
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
