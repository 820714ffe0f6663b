//! Disk and memory utilization probes.

use std::path::Path;

use warden_core::ProbeStatus;

use crate::probe::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Disk,
    Memory,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Memory => "memory",
        }
    }
}

/// Utilization percentages at which a resource degrades and fails.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub degraded_pct: u64,
    pub failed_pct: u64,
}

#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub kind: ResourceKind,
    pub used_pct: Option<u64>,
    pub outcome: ProbeOutcome,
}

/// Above `failed_pct` fails; `degraded_pct..=failed_pct` degrades.
pub fn classify_utilization(used_pct: u64, thresholds: Thresholds) -> ProbeStatus {
    if used_pct > thresholds.failed_pct {
        ProbeStatus::Failed
    } else if used_pct >= thresholds.degraded_pct {
        ProbeStatus::Degraded
    } else {
        ProbeStatus::Healthy
    }
}

/// Used percentage rounded up, as `df` reports it, so 90.1% reads 91.
fn usage_percent(total: u64, available: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let used = u128::from(total.saturating_sub(available)) * 100;
    used.div_ceil(u128::from(total)) as u64
}

/// Used space on the filesystem holding `path`, in percent.
#[cfg(target_family = "unix")]
pub fn disk_usage_pct(path: &Path) -> std::io::Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: statvfs is a plain C struct of integers; zeroed is a valid value.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: path_cstr is a valid NUL-terminated string and stat a valid out pointer.
    let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let frsize = stat.f_frsize as u64;
    let total = (stat.f_blocks as u64).saturating_mul(frsize);
    let available = (stat.f_bavail as u64).saturating_mul(frsize);
    Ok(usage_percent(total, available))
}

#[cfg(not(target_family = "unix"))]
pub fn disk_usage_pct(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk usage is only available on Unix",
    ))
}

/// Parse `/proc/meminfo` into a used-memory percentage.
pub fn parse_meminfo(content: &str) -> Option<u64> {
    let field = |name: &str| -> Option<u64> {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse().ok()
        })
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    Some(usage_percent(total, available))
}

pub fn memory_usage_pct() -> std::io::Result<u64> {
    let content = std::fs::read_to_string("/proc/meminfo")?;
    parse_meminfo(&content).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "MemTotal/MemAvailable missing")
    })
}

fn sample(kind: ResourceKind, used: std::io::Result<u64>, thresholds: Thresholds) -> ResourceSample {
    match used {
        Ok(pct) => {
            let status = classify_utilization(pct, thresholds);
            ResourceSample {
                kind,
                used_pct: Some(pct),
                outcome: ProbeOutcome::new(status, format!("{} usage {pct}%", kind.label())),
            }
        }
        Err(e) => ResourceSample {
            kind,
            used_pct: None,
            outcome: ProbeOutcome::unknown(format!("{} usage unavailable: {e}", kind.label())),
        },
    }
}

pub fn disk_probe(path: &Path, thresholds: Thresholds) -> ResourceSample {
    sample(ResourceKind::Disk, disk_usage_pct(path), thresholds)
}

pub fn memory_probe(thresholds: Thresholds) -> ResourceSample {
    sample(ResourceKind::Memory, memory_usage_pct(), thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        degraded_pct: 80,
        failed_pct: 90,
    };

    #[test]
    fn utilization_bands() {
        assert_eq!(classify_utilization(79, T), ProbeStatus::Healthy);
        assert_eq!(classify_utilization(80, T), ProbeStatus::Degraded);
        assert_eq!(classify_utilization(90, T), ProbeStatus::Degraded);
        assert_eq!(classify_utilization(91, T), ProbeStatus::Failed);
    }

    #[test]
    fn usage_percent_zero_total() {
        assert_eq!(usage_percent(0, 0), 0);
        assert_eq!(usage_percent(100, 25), 75);
    }

    #[test]
    fn fraction_above_failed_threshold_fails() {
        let content = "MemTotal:           1000 kB\nMemAvailable:         95 kB\n";
        assert_eq!(parse_meminfo(content), Some(91));
        assert_eq!(classify_utilization(91, T), ProbeStatus::Failed);

        let exact = "MemTotal:           1000 kB\nMemAvailable:        100 kB\n";
        assert_eq!(parse_meminfo(exact), Some(90));
        assert_eq!(usage_percent(u64::MAX, 0), 100);
    }

    #[test]
    fn meminfo_parsing() {
        let content = "MemTotal:        2000000 kB\nMemFree:          100000 kB\nMemAvailable:     300000 kB\n";
        assert_eq!(parse_meminfo(content), Some(85));
        assert_eq!(parse_meminfo("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn disk_probe_on_tempdir_reports_a_percentage() {
        let dir = tempfile::tempdir().unwrap();
        let sample = disk_probe(dir.path(), T);
        assert_eq!(sample.kind, ResourceKind::Disk);
        assert!(sample.used_pct.unwrap() <= 100);
    }

    #[test]
    fn disk_probe_on_missing_path_is_unknown() {
        let sample = disk_probe(Path::new("/nonexistent/warden/path"), T);
        assert_eq!(sample.outcome.status, ProbeStatus::Unknown);
        assert!(sample.used_pct.is_none());
    }
}
