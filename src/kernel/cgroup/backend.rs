//! Collaborator seams for cgroup accounting.
//!
//! The accountant only needs two capabilities: find where a subsystem is
//! mounted, and turn a set of mount points into counters. Both sit behind
//! traits so the accountant can run against fake hierarchies in tests.

use crate::config::types::{CgrunError, Result, SubsystemSet};
use crate::kernel::cgroup::stats::StatsReport;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Subsystem name to mount path
pub type MountpointMap = BTreeMap<String, PathBuf>;

pub trait MountpointResolver: Send + Sync {
    /// Mount path of `subsystem`, or `MountpointResolution` if it has none
    fn resolve(&self, subsystem: &str) -> Result<PathBuf>;

    /// Mount paths of every subsystem in the set. Fails on the first miss.
    fn resolve_all(&self, subsystems: &SubsystemSet) -> Result<MountpointMap> {
        subsystems
            .iter()
            .map(|subsystem| Ok((subsystem.to_string(), self.resolve(subsystem)?)))
            .collect()
    }
}

pub trait StatsReader: Send + Sync {
    /// Read and aggregate the counters of every mounted subsystem
    fn read_stats(&self, mountpoints: &MountpointMap) -> Result<StatsReport>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// A directory belongs to the unified hierarchy when it exposes `cgroup.controllers`.
pub fn detect_hierarchy(path: &Path) -> CgroupVersion {
    if path.join("cgroup.controllers").exists() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

pub fn version_name(version: CgroupVersion) -> &'static str {
    match version {
        CgroupVersion::V1 => "cgroup_v1",
        CgroupVersion::V2 => "cgroup_v2",
    }
}

/// Reads counters from real cgroup hierarchies, choosing the v1 or v2 file
/// layout per mount point.
#[derive(Debug, Default, Clone)]
pub struct CgroupStatsReader;

impl CgroupStatsReader {
    pub fn new() -> Self {
        Self
    }
}

impl StatsReader for CgroupStatsReader {
    fn read_stats(&self, mountpoints: &MountpointMap) -> Result<StatsReport> {
        let mut report = StatsReport::default();
        // v1 aliases (cpuacct, blkio) and their v2 controllers share one set
        // of files on a unified mount; each is read only once per path.
        let mut read = BTreeSet::new();

        for (subsystem, path) in mountpoints {
            let version = detect_hierarchy(path);
            if version == CgroupVersion::V2
                && !read.insert((path.as_path(), super::v2::controller_for(subsystem)))
            {
                log::debug!("{} already read from {}", subsystem, path.display());
                continue;
            }
            log::debug!(
                "Reading {} counters from {} ({})",
                subsystem,
                path.display(),
                version_name(version)
            );
            match version {
                CgroupVersion::V1 => super::v1::read_subsystem(subsystem, path, &mut report)?,
                CgroupVersion::V2 => super::v2::read_subsystem(subsystem, path, &mut report)?,
            }
        }

        Ok(report)
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| CgrunError::Collection(format!("Failed to read {}: {}", path.display(), e)))
}

/// Read a file holding a single unsigned counter. `max` reads as `u64::MAX`.
pub(crate) fn read_u64(path: &Path) -> Result<u64> {
    parse_u64(read_file(path)?.trim(), path)
}

/// Like [`read_u64`], but a missing file reads as `None`
pub(crate) fn read_optional_u64(path: &Path) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    read_u64(path).map(Some)
}

pub(crate) fn parse_u64(value: &str, path: &Path) -> Result<u64> {
    if value == "max" {
        return Ok(u64::MAX);
    }
    value.parse::<u64>().map_err(|e| {
        CgrunError::Collection(format!(
            "Failed to parse '{}' in {}: {}",
            value,
            path.display(),
            e
        ))
    })
}

/// Parse a flat keyed file (`key value` per line), e.g. `memory.stat` or `cpu.stat`
pub(crate) fn read_flat_keyed(path: &Path) -> Result<BTreeMap<String, u64>> {
    let content = read_file(path)?;
    let mut values = BTreeMap::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        values.insert(key.to_string(), parse_u64(value, path)?);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_name() {
        assert_eq!(version_name(CgroupVersion::V1), "cgroup_v1");
        assert_eq!(version_name(CgroupVersion::V2), "cgroup_v2");
    }

    #[test]
    fn test_detect_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_hierarchy(dir.path()), CgroupVersion::V1);
        fs::write(dir.path().join("cgroup.controllers"), "cpu memory\n").unwrap();
        assert_eq!(detect_hierarchy(dir.path()), CgroupVersion::V2);
    }

    #[test]
    fn test_read_flat_keyed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("memory.stat");
        fs::write(&file, "cache 4096\nrss 8192\n\nbogus\n").unwrap();

        let values = read_flat_keyed(&file).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["cache"], 4096);
        assert_eq!(values["rss"], 8192);
    }

    #[test]
    fn test_read_u64_max_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pids.max");
        fs::write(&file, "max\n").unwrap();
        assert_eq!(read_u64(&file).unwrap(), u64::MAX);

        fs::write(&file, "lots\n").unwrap();
        assert!(matches!(read_u64(&file), Err(CgrunError::Collection(_))));
    }

    #[test]
    fn test_read_optional_u64_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_optional_u64(&dir.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_unified_aliases_read_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cgroup.controllers"), "cpu io\n").unwrap();
        fs::write(dir.path().join("cpu.stat"), "usage_usec 10\nuser_usec 6\nsystem_usec 4\n").unwrap();
        fs::write(dir.path().join("io.stat"), "8:0 rbytes=512 wbytes=1024 rios=1 wios=2\n").unwrap();

        let mountpoints: MountpointMap = ["blkio", "io", "cpu", "cpuacct"]
            .iter()
            .map(|s| (s.to_string(), dir.path().to_path_buf()))
            .collect();
        let report = CgroupStatsReader::new().read_stats(&mountpoints).unwrap();

        assert_eq!(report.blkio_stats.io_service_bytes_recursive.len(), 2);
        assert_eq!(report.blkio_stats.io_serviced_recursive.len(), 2);
        assert_eq!(report.cpu_stats.cpu_usage.total_usage, 10_000);
    }

    #[test]
    fn test_empty_map_reads_empty_report() {
        let report = CgroupStatsReader::new().read_stats(&MountpointMap::new()).unwrap();
        assert_eq!(report, StatsReport::default());
    }
}
