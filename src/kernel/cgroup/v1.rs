//! Cgroup v1 counters.
//!
//! Each subsystem has its own hierarchy, so every reader gets the mount path
//! of exactly one subsystem.

use crate::config::types::{CgrunError, Result};
use crate::kernel::cgroup::backend::{
    parse_u64, read_file, read_flat_keyed, read_optional_u64, read_u64,
};
use crate::kernel::cgroup::stats::{BlkioStatEntry, MemoryData, StatsReport};
use std::path::Path;

const NANOS_PER_SEC: u64 = 1_000_000_000;

pub(crate) fn read_subsystem(subsystem: &str, path: &Path, report: &mut StatsReport) -> Result<()> {
    match subsystem {
        "cpuacct" => read_cpuacct(path, report),
        "cpu" => read_cpu(path, report),
        "memory" => read_memory(path, report),
        "pids" => read_pids(path, report),
        "blkio" => read_blkio(path, report),
        other => {
            log::debug!("Subsystem {} exposes no counters", other);
            Ok(())
        }
    }
}

/// USER_HZ, the unit of `cpuacct.stat`
fn clock_ticks_per_sec() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

fn read_cpuacct(path: &Path, report: &mut StatsReport) -> Result<()> {
    let usage = &mut report.cpu_stats.cpu_usage;

    usage.total_usage = read_u64(&path.join("cpuacct.usage"))?;

    let percpu_file = path.join("cpuacct.usage_percpu");
    usage.percpu_usage = read_file(&percpu_file)?
        .split_whitespace()
        .map(|value| parse_u64(value, &percpu_file))
        .collect::<Result<Vec<_>>>()?;

    let stat = read_flat_keyed(&path.join("cpuacct.stat"))?;
    let ticks = clock_ticks_per_sec();
    let to_nanos = |key: &str| stat.get(key).map_or(0, |t| t.saturating_mul(NANOS_PER_SEC) / ticks);
    usage.usage_in_usermode = to_nanos("user");
    usage.usage_in_kernelmode = to_nanos("system");

    Ok(())
}

fn read_cpu(path: &Path, report: &mut StatsReport) -> Result<()> {
    let stat = read_flat_keyed(&path.join("cpu.stat"))?;
    let throttling = &mut report.cpu_stats.throttling_data;

    throttling.periods = stat.get("nr_periods").copied().unwrap_or(0);
    throttling.throttled_periods = stat.get("nr_throttled").copied().unwrap_or(0);
    throttling.throttled_time = stat.get("throttled_time").copied().unwrap_or(0);

    Ok(())
}

/// `memory.<prefix>usage_in_bytes` and friends. Missing files are an error
/// for the plain counters and tolerated for the optional swap/kmem families.
fn read_memory_data(path: &Path, prefix: &str, required: bool) -> Result<MemoryData> {
    let file = |name: &str| path.join(format!("memory.{}{}", prefix, name));

    if !required && !file("usage_in_bytes").exists() {
        return Ok(MemoryData::default());
    }

    let limit = read_u64(&file("limit_in_bytes"))?;
    Ok(MemoryData {
        usage: read_u64(&file("usage_in_bytes"))?,
        max_usage: read_optional_u64(&file("max_usage_in_bytes"))?.unwrap_or(0),
        failcnt: read_optional_u64(&file("failcnt"))?.unwrap_or(0),
        limit,
    })
}

fn read_memory(path: &Path, report: &mut StatsReport) -> Result<()> {
    let memory = &mut report.memory_stats;

    memory.usage = read_memory_data(path, "", true)?;
    memory.swap_usage = read_memory_data(path, "memsw.", false)?;
    memory.kernel_usage = read_memory_data(path, "kmem.", false)?;
    memory.kernel_tcp_usage = read_memory_data(path, "kmem.tcp.", false)?;
    memory.use_hierarchy = read_optional_u64(&path.join("memory.use_hierarchy"))? == Some(1);

    memory.stats = read_flat_keyed(&path.join("memory.stat"))?;
    memory.cache = memory.stats.get("cache").copied().unwrap_or(0);

    Ok(())
}

fn read_pids(path: &Path, report: &mut StatsReport) -> Result<()> {
    report.pids_stats.current = read_u64(&path.join("pids.current"))?;
    report.pids_stats.limit = match read_optional_u64(&path.join("pids.max"))? {
        Some(u64::MAX) | None => 0,
        Some(limit) => limit,
    };
    Ok(())
}

/// First existing file among the proportional-weight and throttling variants
fn read_blkio_entries(path: &Path, names: &[&str]) -> Result<Vec<BlkioStatEntry>> {
    let Some(file) = names.iter().map(|n| path.join(n)).find(|p| p.exists()) else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for line in read_file(&file)?.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // "Total <n>" summary lines carry no device
        if fields.len() != 3 {
            continue;
        }

        let (major, minor) = fields[0].split_once(':').ok_or_else(|| {
            CgrunError::Collection(format!("Malformed device '{}' in {}", fields[0], file.display()))
        })?;

        entries.push(BlkioStatEntry {
            major: parse_u64(major, &file)?,
            minor: parse_u64(minor, &file)?,
            op: fields[1].to_string(),
            value: parse_u64(fields[2], &file)?,
        });
    }

    Ok(entries)
}

fn read_blkio(path: &Path, report: &mut StatsReport) -> Result<()> {
    let blkio = &mut report.blkio_stats;

    blkio.io_service_bytes_recursive = read_blkio_entries(
        path,
        &[
            "blkio.io_service_bytes_recursive",
            "blkio.throttle.io_service_bytes_recursive",
            "blkio.throttle.io_service_bytes",
        ],
    )?;
    blkio.io_serviced_recursive = read_blkio_entries(
        path,
        &[
            "blkio.io_serviced_recursive",
            "blkio.throttle.io_serviced_recursive",
            "blkio.throttle.io_serviced",
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_cpuacct_counters() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cpuacct.usage", "123456789\n");
        write(dir.path(), "cpuacct.usage_percpu", "100 200 300 \n");
        write(dir.path(), "cpuacct.stat", "user 10\nsystem 5\n");

        let mut report = StatsReport::default();
        read_subsystem("cpuacct", dir.path(), &mut report).unwrap();

        let usage = &report.cpu_stats.cpu_usage;
        let ticks = clock_ticks_per_sec();
        assert_eq!(usage.total_usage, 123456789);
        assert_eq!(usage.percpu_usage, vec![100, 200, 300]);
        assert_eq!(usage.usage_in_usermode, 10 * NANOS_PER_SEC / ticks);
        assert_eq!(usage.usage_in_kernelmode, 5 * NANOS_PER_SEC / ticks);
    }

    #[test]
    fn test_cpuacct_missing_usage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = StatsReport::default();
        let err = read_subsystem("cpuacct", dir.path(), &mut report).unwrap_err();
        assert!(matches!(err, CgrunError::Collection(_)));
    }

    #[test]
    fn test_memory_counters() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "memory.usage_in_bytes", "4096\n");
        write(dir.path(), "memory.max_usage_in_bytes", "8192\n");
        write(dir.path(), "memory.failcnt", "0\n");
        write(dir.path(), "memory.limit_in_bytes", "9223372036854771712\n");
        write(dir.path(), "memory.use_hierarchy", "1\n");
        write(dir.path(), "memory.stat", "cache 1024\nrss 2048\n");

        let mut report = StatsReport::default();
        read_subsystem("memory", dir.path(), &mut report).unwrap();

        let memory = &report.memory_stats;
        assert_eq!(memory.usage.usage, 4096);
        assert_eq!(memory.usage.max_usage, 8192);
        assert_eq!(memory.usage.limit, 9223372036854771712);
        assert_eq!(memory.cache, 1024);
        assert_eq!(memory.stats["rss"], 2048);
        assert!(memory.use_hierarchy);
        assert_eq!(memory.swap_usage, MemoryData::default());
    }

    #[test]
    fn test_memory_swap_counters_when_present() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "memory.usage_in_bytes", "4096\n");
        write(dir.path(), "memory.limit_in_bytes", "65536\n");
        write(dir.path(), "memory.memsw.usage_in_bytes", "5000\n");
        write(dir.path(), "memory.memsw.limit_in_bytes", "70000\n");
        write(dir.path(), "memory.stat", "cache 0\n");

        let mut report = StatsReport::default();
        read_subsystem("memory", dir.path(), &mut report).unwrap();

        assert_eq!(report.memory_stats.swap_usage.usage, 5000);
        assert_eq!(report.memory_stats.swap_usage.limit, 70000);
        assert!(!report.memory_stats.use_hierarchy);
    }

    #[test]
    fn test_pids_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pids.current", "3\n");
        write(dir.path(), "pids.max", "max\n");

        let mut report = StatsReport::default();
        read_subsystem("pids", dir.path(), &mut report).unwrap();
        assert_eq!(report.pids_stats.current, 3);
        assert_eq!(report.pids_stats.limit, 0);
    }

    #[test]
    fn test_blkio_skips_total_lines() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "blkio.throttle.io_service_bytes",
            "8:0 Read 4096\n8:0 Write 512\nTotal 4608\n",
        );

        let mut report = StatsReport::default();
        read_subsystem("blkio", dir.path(), &mut report).unwrap();

        let entries = &report.blkio_stats.io_service_bytes_recursive;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].major, 8);
        assert_eq!(entries[0].op, "Read");
        assert_eq!(entries[1].value, 512);
        assert!(report.blkio_stats.io_serviced_recursive.is_empty());
    }

    #[test]
    fn test_cpu_throttling() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cpu.stat", "nr_periods 10\nnr_throttled 2\nthrottled_time 5000\n");

        let mut report = StatsReport::default();
        read_subsystem("cpu", dir.path(), &mut report).unwrap();
        assert_eq!(report.cpu_stats.throttling_data.periods, 10);
        assert_eq!(report.cpu_stats.throttling_data.throttled_periods, 2);
        assert_eq!(report.cpu_stats.throttling_data.throttled_time, 5000);
    }

    #[test]
    fn test_unknown_subsystem_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = StatsReport::default();
        read_subsystem("freezer", dir.path(), &mut report).unwrap();
        assert_eq!(report, StatsReport::default());
    }
}
