//! Append-only JSONL writer, one file per device per day.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::JsonLogEntry;

/// Appends entries to `<log-dir>/raw/<date>_<device>.jsonl`
pub struct DeviceLogWriter {
    device: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl DeviceLogWriter {
    /// Open (or create) today's file for `device`.
    ///
    /// ```text
    /// logs/
    /// └── raw/
    ///     ├── 2026-10-19_phone.jsonl
    ///     └── 2026-10-19_watch.jsonl
    /// ```
    pub fn new(logs_dir: impl AsRef<Path>, device: impl Into<String>) -> std::io::Result<Self> {
        let device = device.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, device));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            device,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry as a line and flush.
    pub fn write(&self, entry: &JsonLogEntry) -> std::io::Result<()> {
        let json = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for DeviceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every device's entries under `logs_dir`, sorted by timestamp.
///
/// Lines that fail to parse are skipped.
pub fn read_all_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<JsonLogEntry>> {
    read_matching(logs_dir.as_ref(), |_| true)
}

/// Read entries from files dated `date` (`YYYY-MM-DD`).
pub fn read_entries_for_date(
    logs_dir: impl AsRef<Path>,
    date: &str,
) -> std::io::Result<Vec<JsonLogEntry>> {
    read_matching(logs_dir.as_ref(), |name| name.starts_with(date))
}

fn read_matching(
    logs_dir: &Path,
    accept: impl Fn(&str) -> bool,
) -> std::io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        if !name.ends_with(".jsonl") || !accept(name) {
            continue;
        }

        let content = fs::read_to_string(&path)?;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match JsonLogEntry::from_json_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping bad log line"),
            }
        }
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_creates_directory_structure() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let writer = DeviceLogWriter::new(&logs_dir, "phone").unwrap();

        assert!(logs_dir.join("raw").exists());
        assert!(writer.path().exists());
        assert!(writer.path().to_string_lossy().ends_with("_phone.jsonl"));
    }

    #[test]
    fn test_read_all_entries_merges_devices() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let phone = DeviceLogWriter::new(&logs_dir, "phone").unwrap();
        let watch = DeviceLogWriter::new(&logs_dir, "watch").unwrap();

        watch
            .write(&JsonLogEntry::new("info", "watch", "sync", "Requested weather"))
            .unwrap();
        phone
            .write(&JsonLogEntry::new("info", "phone", "sync", "Weather requested"))
            .unwrap();
        drop(phone);
        drop(watch);

        let entries = read_all_entries(&logs_dir).unwrap();
        assert_eq!(entries.len(), 2);
        let devices: Vec<_> = entries.iter().map(|e| e.device.as_str()).collect();
        assert!(devices.contains(&"phone"));
        assert!(devices.contains(&"watch"));
    }

    #[test]
    fn test_bad_lines_and_other_dates_are_skipped() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().join("raw");
        fs::create_dir_all(&raw).unwrap();

        let good = JsonLogEntry::new("warn", "watch", "sync", "Icon asset unavailable")
            .to_json_line()
            .unwrap();
        fs::write(raw.join("2026-01-02_watch.jsonl"), format!("{}\nnot json\n\n", good)).unwrap();
        fs::write(raw.join("2026-01-01_watch.jsonl"), format!("{}\n", good)).unwrap();

        assert_eq!(read_all_entries(temp.path()).unwrap().len(), 2);
        assert_eq!(read_entries_for_date(temp.path(), "2026-01-02").unwrap().len(), 1);
        assert!(read_all_entries(temp.path().join("missing")).unwrap().is_empty());
    }
}
