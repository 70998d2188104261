//! Host identity used to keep measurements from different machines apart.
//!
//! CPU model and memory come from `/proc` on Linux and degrade to `"Unknown"` / 0
//! elsewhere.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostProfile {
    #[serde(rename = "cpuModel")]
    pub cpu_model: String,
    #[serde(rename = "cpuCount")]
    pub cpu_count: u32,
    /// Total memory in GB, rounded to two decimals so it compares stably.
    #[serde(rename = "totalMemoryGb")]
    pub total_memory_gb: f64,
    pub os: String,
}

/// Source of the current host profile. Called once per request; implementations must
/// not cache across requests.
pub trait HostProfileProvider: Send + Sync {
    fn current(&self) -> HostProfile;
}

/// A fixed profile, mostly for tests and replaying records.
impl HostProfileProvider for HostProfile {
    fn current(&self) -> HostProfile {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostProfile;

impl HostProfileProvider for SystemHostProfile {
    fn current(&self) -> HostProfile {
        HostProfile {
            cpu_model: cpu_model().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            total_memory_gb: memory_kb()
                .map(|kb| round_gb(kb.saturating_mul(1024)))
                .unwrap_or(0.0),
            os: os_descriptor(),
        }
    }
}

pub fn round_gb(bytes: u64) -> f64 {
    let gb = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (gb * 100.0).round() / 100.0
}

fn cpu_model() -> Option<String> {
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|content| parse_cpu_model(&content))
}

fn memory_kb() -> Option<u64> {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| parse_mem_total_kb(&content))
}

fn os_descriptor() -> String {
    let pretty = std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| parse_pretty_name(&content));
    match pretty {
        Some(name) => format!("{name} ({})", std::env::consts::ARCH),
        None => format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
    }
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name") || l.starts_with("Model"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_mem_total_kb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_files() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU @ 2.20GHz\n";
        assert_eq!(
            parse_cpu_model(cpuinfo).as_deref(),
            Some("Intel(R) Xeon(R) CPU @ 2.20GHz")
        );

        let meminfo = "MemTotal:       16318480 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_mem_total_kb(meminfo), Some(16_318_480));

        let release = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n";
        assert_eq!(
            parse_pretty_name(release).as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
    }

    #[test]
    fn memory_is_rounded_to_two_decimals() {
        assert_eq!(round_gb(16 * 1024 * 1024 * 1024), 16.0);
        assert_eq!(round_gb(16_318_480 * 1024), 15.56);
    }

    #[test]
    fn system_profile_is_populated() {
        let profile = SystemHostProfile.current();
        assert!(profile.cpu_count >= 1);
        assert!(!profile.cpu_model.is_empty());
        assert!(!profile.os.is_empty());
    }
}
