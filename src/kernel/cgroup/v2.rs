//! Cgroup v2 (unified hierarchy) counters.
//!
//! Every controller shares one directory, so the same path may be handed in
//! for several subsystem names. v1 names are accepted as aliases.

use crate::config::types::{CgrunError, Result};
use crate::kernel::cgroup::backend::{parse_u64, read_file, read_flat_keyed, read_optional_u64, read_u64};
use crate::kernel::cgroup::stats::{BlkioStatEntry, StatsReport};
use std::collections::BTreeMap;
use std::path::Path;

const NANOS_PER_MICRO: u64 = 1_000;

pub(crate) fn read_subsystem(subsystem: &str, path: &Path, report: &mut StatsReport) -> Result<()> {
    match subsystem {
        "cpu" | "cpuacct" => read_cpu(path, report),
        "memory" => read_memory(path, report),
        "pids" => read_pids(path, report),
        "io" | "blkio" => read_io(path, report),
        other => {
            log::debug!("Subsystem {} exposes no counters", other);
            Ok(())
        }
    }
}

/// v1 subsystem name to the v2 controller that provides it
pub fn controller_for(subsystem: &str) -> &str {
    match subsystem {
        "cpuacct" => "cpu",
        "blkio" => "io",
        other => other,
    }
}

/// Whether `subsystem` can be read from the unified hierarchy at `path`.
/// CPU accounting (`cpu.stat`) is always present, enabled controller or not.
pub fn supports(path: &Path, subsystem: &str) -> bool {
    let controller = controller_for(subsystem);
    if controller == "cpu" {
        return true;
    }

    std::fs::read_to_string(path.join("cgroup.controllers"))
        .map(|content| content.split_whitespace().any(|c| c == controller))
        .unwrap_or(false)
}

fn read_cpu(path: &Path, report: &mut StatsReport) -> Result<()> {
    let stat = read_flat_keyed(&path.join("cpu.stat"))?;
    let micros = |key: &str| stat.get(key).copied().unwrap_or(0).saturating_mul(NANOS_PER_MICRO);

    let usage = &mut report.cpu_stats.cpu_usage;
    usage.total_usage = micros("usage_usec");
    usage.usage_in_usermode = micros("user_usec");
    usage.usage_in_kernelmode = micros("system_usec");

    let throttling = &mut report.cpu_stats.throttling_data;
    throttling.periods = stat.get("nr_periods").copied().unwrap_or(0);
    throttling.throttled_periods = stat.get("nr_throttled").copied().unwrap_or(0);
    throttling.throttled_time = micros("throttled_usec");

    Ok(())
}

fn read_memory(path: &Path, report: &mut StatsReport) -> Result<()> {
    let memory = &mut report.memory_stats;

    memory.usage.usage = read_u64(&path.join("memory.current"))?;
    memory.usage.max_usage = read_optional_u64(&path.join("memory.peak"))?.unwrap_or(0);
    memory.usage.limit = read_optional_u64(&path.join("memory.max"))?.unwrap_or(u64::MAX);

    let events_file = path.join("memory.events");
    if events_file.exists() {
        memory.usage.failcnt = read_flat_keyed(&events_file)?.get("max").copied().unwrap_or(0);
    }

    if let Some(swap) = read_optional_u64(&path.join("memory.swap.current"))? {
        memory.swap_usage.usage = swap;
        memory.swap_usage.limit = read_optional_u64(&path.join("memory.swap.max"))?.unwrap_or(u64::MAX);
    }

    memory.stats = read_flat_keyed(&path.join("memory.stat"))?;
    memory.cache = memory.stats.get("file").copied().unwrap_or(0);
    memory.use_hierarchy = true;

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

/// `io.stat` lines look like `8:0 rbytes=1 wbytes=2 rios=3 wios=4 ...`
fn read_io(path: &Path, report: &mut StatsReport) -> Result<()> {
    let file = path.join("io.stat");
    if !file.exists() {
        return Ok(());
    }

    let blkio = &mut report.blkio_stats;
    for line in read_file(&file)?.lines() {
        let mut fields = line.split_whitespace();
        let Some(device) = fields.next() else {
            continue;
        };
        let (major, minor) = device.split_once(':').ok_or_else(|| {
            CgrunError::Collection(format!("Malformed device '{}' in {}", device, file.display()))
        })?;
        let (major, minor) = (parse_u64(major, &file)?, parse_u64(minor, &file)?);

        let mut counters = BTreeMap::new();
        for field in fields {
            if let Some((key, value)) = field.split_once('=') {
                counters.insert(key, parse_u64(value, &file)?);
            }
        }

        let entry = |op: &str, key: &str| BlkioStatEntry {
            major,
            minor,
            op: op.to_string(),
            value: counters.get(key).copied().unwrap_or(0),
        };
        blkio.io_service_bytes_recursive.push(entry("Read", "rbytes"));
        blkio.io_service_bytes_recursive.push(entry("Write", "wbytes"));
        blkio.io_serviced_recursive.push(entry("Read", "rios"));
        blkio.io_serviced_recursive.push(entry("Write", "wios"));
    }

    Ok(())
}
