pub mod actors;
pub mod api;
pub mod config;
pub mod monitors;
pub mod protocol;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Address reported when a host exposes no usable IPv4 address
pub const UNSPECIFIED_IP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// One point-in-time telemetry snapshot of a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub platform: String,
    pub os_version: String,
    pub cpu: CpuInformation,
    pub memory: MemoryInformation,
    pub disks: Vec<DiskInformation>,
    pub interfaces: BTreeMap<String, InterfaceInformation>,
    /// Boot time in UTC, formatted `YYYY-MM-DD HH:MM:SS`
    pub boot_time: String,
    pub process_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInformation {
    pub physical_cores: Option<usize>,
    pub logical_cores: usize,
    pub percent_usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInformation {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInformation {
    pub device: String,
    pub mountpoint: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInformation {
    #[serde(default)]
    pub addresses: Vec<AddressInformation>,
    #[serde(default)]
    pub io: IoInformation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInformation {
    pub ip: String,
    pub netmask: Option<String>,
    pub broadcast: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoInformation {
    pub upload_bps: f64,
    pub download_bps: f64,
    pub total_upload: u64,
    pub total_download: u64,
}

impl Sample {
    /// The address a host is identified by: the first non-loopback IPv4
    /// address over all interfaces, or `0.0.0.0` if there is none.
    pub fn primary_ipv4(&self) -> Ipv4Addr {
        self.interfaces
            .values()
            .flat_map(|interface| interface.addresses.iter())
            .filter_map(|address| address.ip.parse::<Ipv4Addr>().ok())
            .find(|ip| !ip.is_loopback())
            .unwrap_or(UNSPECIFIED_IP)
    }
}

/// Sum of `total_upload` over all interfaces
pub fn total_upload(interfaces: &BTreeMap<String, InterfaceInformation>) -> u64 {
    interfaces
        .values()
        .fold(0u64, |acc, interface| acc.saturating_add(interface.io.total_upload))
}

/// Sum of `total_download` over all interfaces
pub fn total_download(interfaces: &BTreeMap<String, InterfaceInformation>) -> u64 {
    interfaces
        .values()
        .fold(0u64, |acc, interface| acc.saturating_add(interface.io.total_download))
}

/// Highest usage percentage over all disks, `0.0` without disks
pub fn max_disk_percent(disks: &[DiskInformation]) -> f64 {
    disks.iter().map(|disk| disk.percent).fold(0.0, f64::max)
}
