use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_STEM: &str = "vidharini.";
pub const LOG_FILE_EXT: &str = ".log";
pub const LOG_RETENTION_DAYS: i64 = 30;

/// Where tracing output goes.
#[derive(Debug, Clone)]
pub enum LogSink {
    Console,
    /// One file per UTC hour under `dir`; files older than `retention_days`
    /// are pruned at startup and on every rollover.
    HourlyFiles { dir: PathBuf, retention_days: i64 },
}

impl LogSink {
    /// File logging under `<data_dir>/logs` when `VIDHARINI_LOG_TO_FILE` is
    /// set to anything but `0`/`false`, console otherwise.
    pub fn from_env(data_dir: &str) -> Self {
        let wants_files = std::env::var("VIDHARINI_LOG_TO_FILE")
            .map(|v| !matches!(v.trim(), "" | "0" | "false"))
            .unwrap_or(false);
        if wants_files {
            LogSink::HourlyFiles {
                dir: Path::new(data_dir).join("logs"),
                retention_days: LOG_RETENTION_DAYS,
            }
        } else {
            LogSink::Console
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(sink: LogSink) -> Result<()> {
    match sink {
        LogSink::Console => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .try_init()
            .map_err(|e| anyhow!("failed to install console logger: {e}")),
        LogSink::HourlyFiles {
            dir,
            retention_days,
        } => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            prune_logs(&dir, Utc::now(), retention_days)?;
            let writer = HourlyFile::open(dir, retention_days)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| anyhow!("failed to install file logger: {e}"))
        }
    }
}

struct Segment {
    hour: String,
    file: File,
}

pub struct HourlyFile {
    dir: PathBuf,
    retention_days: i64,
    segment: Mutex<Segment>,
}

impl HourlyFile {
    pub fn open(dir: PathBuf, retention_days: i64) -> Result<Self> {
        let hour = hour_label(Utc::now());
        let file = open_segment(&dir, &hour)
            .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
        Ok(Self {
            dir,
            retention_days,
            segment: Mutex::new(Segment { hour, file }),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Segment>> {
        self.segment
            .lock()
            .map_err(|_| io::Error::other("log segment lock poisoned"))
    }

    fn append(&self, buf: &[u8]) -> io::Result<usize> {
        let now = Utc::now();
        let hour = hour_label(now);
        let mut segment = self.lock()?;
        if segment.hour != hour {
            segment.file.flush()?;
            segment.file = open_segment(&self.dir, &hour)?;
            segment.hour = hour;
            let _ = prune_logs(&self.dir, now, self.retention_days);
        }
        segment.file.write(buf)
    }
}

impl Write for &HourlyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

impl<'a> MakeWriter<'a> for HourlyFile {
    type Writer = &'a HourlyFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn hour_label(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

fn open_segment(dir: &Path, hour: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{LOG_FILE_STEM}{hour}{LOG_FILE_EXT}")))
}

fn segment_hour(file_name: &str) -> Option<DateTime<Utc>> {
    let label = file_name
        .strip_prefix(LOG_FILE_STEM)?
        .strip_suffix(LOG_FILE_EXT)?;
    let naive = NaiveDateTime::parse_from_str(&format!("{label}:00"), "%Y-%m-%d-%H:%M").ok()?;
    Some(naive.and_utc())
}

/// Deletes hourly segments that started before `now - retention_days`.
/// Returns how many were removed.
pub fn prune_logs(dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<usize> {
    let cutoff = now - Duration::days(retention_days);
    let entries = match fs::read_dir(dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(segment_hour)
            .is_some_and(|hour| hour < cutoff);
        if stale && path.is_file() && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("vidharini_logging_test_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_segment_hour_parsing() {
        let hour = segment_hour("vidharini.2026-02-08-10.log").unwrap();
        assert_eq!(hour.to_rfc3339(), "2026-02-08T10:00:00+00:00");
        assert!(segment_hour("vidharini.2026-02-08.log").is_none());
        assert!(segment_hour("other.2026-02-08-10.log").is_none());
        assert!(segment_hour("vidharini.2026-02-08-10.txt").is_none());
    }

    #[test]
    fn test_prune_removes_only_expired_segments() {
        let dir = test_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vidharini.2025-01-01-00.log"), "old").unwrap();
        fs::write(dir.join("vidharini.2026-02-08-10.log"), "new").unwrap();
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        let now = DateTime::parse_from_rfc3339("2026-02-08T11:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(prune_logs(&dir, now, 30).unwrap(), 1);

        assert!(!dir.join("vidharini.2025-01-01-00.log").exists());
        assert!(dir.join("vidharini.2026-02-08-10.log").exists());
        assert!(dir.join("notes.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        assert_eq!(prune_logs(&test_dir(), Utc::now(), 30).unwrap(), 0);
    }

    #[test]
    fn test_hourly_file_appends_to_current_segment() {
        let dir = test_dir();
        fs::create_dir_all(&dir).unwrap();
        let sink = HourlyFile::open(dir.clone(), 30).unwrap();
        let mut writer = sink.make_writer();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        writer.flush().unwrap();

        let expected = dir.join(format!(
            "{LOG_FILE_STEM}{}{LOG_FILE_EXT}",
            hour_label(Utc::now())
        ));
        let content = fs::read_to_string(expected).unwrap();
        assert!(content.contains("first line"));
        assert!(content.contains("second line"));
        let _ = fs::remove_dir_all(&dir);
    }
}
