use crate::config::types::{Result, SubsystemSet};
use crate::kernel::cgroup::backend::{MountpointMap, MountpointResolver, StatsReader};
use crate::kernel::cgroup::stats::StatsReport;
use crate::kernel::cgroup::{CgroupStatsReader, MountInfoResolver};
use std::path::Path;

/// Gathers cgroup counters once the child has exited.
///
/// All-or-nothing: a single unresolvable subsystem fails the whole
/// collection, so no partial report is ever produced.
pub struct Accountant {
    resolver: Box<dyn MountpointResolver>,
    reader: Box<dyn StatsReader>,
}

impl Accountant {
    pub fn new(resolver: Box<dyn MountpointResolver>, reader: Box<dyn StatsReader>) -> Self {
        Self { resolver, reader }
    }

    /// Accountant over the host's real cgroup hierarchies
    pub fn from_mountinfo(mountinfo_path: &Path) -> Self {
        Self::new(
            Box::new(MountInfoResolver::new(mountinfo_path)),
            Box::new(CgroupStatsReader::new()),
        )
    }

    pub fn resolve_mountpoints(&self, subsystems: &SubsystemSet) -> Result<MountpointMap> {
        let mountpoints = self.resolver.resolve_all(subsystems)?;
        for (subsystem, path) in &mountpoints {
            log::debug!("Subsystem {} mounted at {}", subsystem, path.display());
        }
        Ok(mountpoints)
    }

    pub fn collect_stats(&self, subsystems: &SubsystemSet) -> Result<StatsReport> {
        let mountpoints = self.resolve_mountpoints(subsystems)?;
        self.reader.read_stats(&mountpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CgrunError;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    struct FixedResolver(BTreeMap<&'static str, &'static str>);

    impl MountpointResolver for FixedResolver {
        fn resolve(&self, subsystem: &str) -> Result<PathBuf> {
            self.0
                .get(subsystem)
                .map(PathBuf::from)
                .ok_or_else(|| CgrunError::MountpointResolution {
                    subsystem: subsystem.to_string(),
                    reason: "not mounted".to_string(),
                })
        }
    }

    #[derive(Default, Clone)]
    struct RecordingReader(Arc<Mutex<Option<MountpointMap>>>);

    impl StatsReader for RecordingReader {
        fn read_stats(&self, mountpoints: &MountpointMap) -> Result<StatsReport> {
            *self.0.lock().unwrap() = Some(mountpoints.clone());
            let mut report = StatsReport::default();
            report.pids_stats.current = mountpoints.len() as u64;
            Ok(report)
        }
    }

    fn accountant(reader: RecordingReader) -> Accountant {
        let resolver = FixedResolver(BTreeMap::from([
            ("cpuacct", "/cg/cpu,cpuacct"),
            ("memory", "/cg/memory"),
        ]));
        Accountant::new(Box::new(resolver), Box::new(reader))
    }

    #[test]
    fn test_collect_passes_full_map_to_reader() {
        let reader = RecordingReader::default();
        let report = accountant(reader.clone())
            .collect_stats(&SubsystemSet::parse("cpuacct,memory"))
            .unwrap();

        assert_eq!(report.pids_stats.current, 2);
        let seen = reader.0.lock().unwrap().clone().unwrap();
        assert_eq!(seen["memory"], PathBuf::from("/cg/memory"));
        assert_eq!(seen["cpuacct"], PathBuf::from("/cg/cpu,cpuacct"));
    }

    #[test]
    fn test_one_missing_subsystem_fails_everything() {
        let reader = RecordingReader::default();
        let err = accountant(reader.clone())
            .collect_stats(&SubsystemSet::parse("cpuacct,memory,nosuch"))
            .unwrap_err();

        assert!(matches!(err, CgrunError::MountpointResolution { .. }));
        assert!(reader.0.lock().unwrap().is_none(), "reader must not run on partial map");
    }
}
