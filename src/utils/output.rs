/// Stats report persistence
///
/// The report is encoded as pretty-printed JSON into a temporary sibling of
/// the destination and renamed into place, so readers either see a complete
/// report or none at all. Absence of the file is the signal that accounting
/// failed.
use crate::config::types::{CgrunError, Result};
use crate::kernel::cgroup::stats::StatsReport;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp.{}", std::process::id()));
        self.path.with_file_name(name)
    }

    pub fn write(&self, report: &StatsReport) -> Result<()> {
        let tmp = self.temp_path();

        let written = Self::write_json(&tmp, report).and_then(|()| {
            fs::rename(&tmp, &self.path).map_err(|e| {
                CgrunError::ReportWrite(format!("Could not move report to {}: {}", self.path.display(), e))
            })
        });

        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            log::info!("Wrote stats report to {}", self.path.display());
        }
        written
    }

    /// Remove a report left by an earlier run so a failed collection is not
    /// mistaken for a successful one.
    pub fn discard_stale(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Removed stale report {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CgrunError::ReportWrite(format!(
                "Could not remove stale report {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_json(path: &Path, report: &StatsReport) -> Result<()> {
        let file = File::create(path).map_err(|e| {
            CgrunError::ReportWrite(format!("Could not create output file {}: {}", path.display(), e))
        })?;

        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, report)
            .map_err(|e| CgrunError::ReportWrite(format!("Failed to serialize stats: {}", e)))?;
        out.flush()
            .and_then(|()| out.get_ref().sync_all())
            .map_err(|e| CgrunError::ReportWrite(format!("Failed writing stats: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut report = StatsReport::default();
        report.memory_stats.usage.usage = 4096;
        report.cpu_stats.cpu_usage.total_usage = 1234;

        ReportWriter::new(&path).write(&report).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["memory_stats"]["usage"]["usage"], 4096);
        assert_eq!(json["cpu_stats"]["cpu_usage"]["total_usage"], 1234);
        assert!(json["pids_stats"].is_object());
        assert!(json["blkio_stats"].is_object());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        ReportWriter::new(&path).write(&StatsReport::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_discard_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let writer = ReportWriter::new(&path);

        writer.discard_stale().unwrap();
        writer.write(&StatsReport::default()).unwrap();
        assert!(path.exists());
        writer.discard_stale().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_destination() {
        let path = PathBuf::from("/nonexistent-cgrun-dir/stats.json");
        let err = ReportWriter::new(&path).write(&StatsReport::default()).unwrap_err();
        assert!(matches!(err, CgrunError::ReportWrite(_)));
        assert!(!path.exists());
    }
}
