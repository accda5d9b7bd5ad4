//! Cgroup mount point discovery from `/proc/self/mountinfo`.

use crate::config::types::{CgrunError, Result, SubsystemSet};
use crate::kernel::cgroup::backend::{MountpointMap, MountpointResolver};
use std::fs;
use std::path::PathBuf;

/// One cgroup mount from the mount table
#[derive(Debug, Clone, PartialEq)]
pub struct CgroupMount {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub super_options: Vec<String>,
}

impl CgroupMount {
    /// v1 hierarchies list their subsystems (or `name=<x>`) as super options
    fn provides_v1(&self, subsystem: &str) -> bool {
        self.fs_type == "cgroup"
            && self.super_options.iter().any(|opt| {
                opt == subsystem || opt.strip_prefix("name=") == Some(subsystem)
            })
    }

    fn is_unified(&self) -> bool {
        self.fs_type == "cgroup2"
    }
}

/// Mount points are octal-escaped by the kernel (`\040` for a space)
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the cgroup and cgroup2 entries of a mountinfo table
pub fn parse_cgroup_mounts(content: &str) -> Vec<CgroupMount> {
    let mut mounts = Vec::new();

    for line in content.lines() {
        let Some((pre, post)) = line.split_once(" - ") else {
            continue;
        };
        let pre: Vec<&str> = pre.split_whitespace().collect();
        let post: Vec<&str> = post.split_whitespace().collect();
        if pre.len() < 5 || post.len() < 3 {
            continue;
        }

        let fs_type = post[0];
        if fs_type != "cgroup" && fs_type != "cgroup2" {
            continue;
        }

        mounts.push(CgroupMount {
            mount_point: PathBuf::from(unescape(pre[4])),
            fs_type: fs_type.to_string(),
            super_options: post[2].split(',').map(str::to_string).collect(),
        });
    }

    mounts
}

/// Resolves subsystem mount points from a mountinfo-format table
#[derive(Debug, Clone)]
pub struct MountInfoResolver {
    mountinfo_path: PathBuf,
}

impl MountInfoResolver {
    pub fn new(mountinfo_path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo_path: mountinfo_path.into(),
        }
    }

    /// Read and parse the table once. The error is the resolution reason.
    fn load(&self) -> std::result::Result<Vec<CgroupMount>, String> {
        fs::read_to_string(&self.mountinfo_path)
            .map(|content| parse_cgroup_mounts(&content))
            .map_err(|e| format!("cannot read {}: {}", self.mountinfo_path.display(), e))
    }
}

/// v1 hierarchies win over the unified one, as on hybrid hosts
fn find_mount(mounts: &[CgroupMount], subsystem: &str) -> Result<PathBuf> {
    if let Some(mount) = mounts.iter().find(|m| m.provides_v1(subsystem)) {
        return Ok(mount.mount_point.clone());
    }

    if let Some(mount) = mounts
        .iter()
        .find(|m| m.is_unified() && super::v2::supports(&m.mount_point, subsystem))
    {
        return Ok(mount.mount_point.clone());
    }

    Err(CgrunError::MountpointResolution {
        subsystem: subsystem.to_string(),
        reason: "no cgroup hierarchy provides it".to_string(),
    })
}

impl MountpointResolver for MountInfoResolver {
    fn resolve(&self, subsystem: &str) -> Result<PathBuf> {
        let mounts = self.load().map_err(|reason| CgrunError::MountpointResolution {
            subsystem: subsystem.to_string(),
            reason,
        })?;
        find_mount(&mounts, subsystem)
    }

    fn resolve_all(&self, subsystems: &SubsystemSet) -> Result<MountpointMap> {
        let mounts = self.load().map_err(|reason| CgrunError::MountpointResolution {
            subsystem: subsystems.iter().collect::<Vec<_>>().join(","),
            reason,
        })?;

        subsystems
            .iter()
            .map(|subsystem| Ok((subsystem.to_string(), find_mount(&mounts, subsystem)?)))
            .collect()
    }
}
