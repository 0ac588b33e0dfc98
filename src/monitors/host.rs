use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use sysinfo::{Disks, Networks, System};
use tracing::{debug, instrument};

use crate::{
    AddressInformation, CpuInformation, DiskInformation, InterfaceInformation, IoInformation,
    MemoryInformation, Sample, util,
};

/// Something that can describe the local host on demand
#[async_trait]
pub trait MetricsSource: Send {
    async fn snapshot(&mut self) -> anyhow::Result<Sample>;
}

/// Byte counters of one interface at a point in time
#[derive(Debug, Clone, Copy)]
struct Counters {
    transmitted: u64,
    received: u64,
}

/// [`MetricsSource`] backed by `sysinfo`.
///
/// Interface rates are derived from the totals seen on the previous
/// snapshot, so the first snapshot reports rates of zero.
pub struct SysinfoSource {
    system: System,
    previous: Option<(Instant, HashMap<String, Counters>)>,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
            previous: None,
        }
    }

    fn cpu(&self) -> CpuInformation {
        CpuInformation {
            physical_cores: System::physical_core_count(),
            logical_cores: self.system.cpus().len(),
            percent_usage: round1(self.system.global_cpu_usage() as f64),
        }
    }

    fn memory(&self) -> MemoryInformation {
        let total = self.system.total_memory();
        let available = self.system.available_memory();

        MemoryInformation {
            total,
            available,
            used: self.system.used_memory(),
            percent: percent_of(total.saturating_sub(available), total),
        }
    }

    fn interfaces(&mut self) -> BTreeMap<String, InterfaceInformation> {
        let networks = Networks::new_with_refreshed_list();
        let now = Instant::now();

        let counters: HashMap<String, Counters> = networks
            .list()
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    Counters {
                        transmitted: data.total_transmitted(),
                        received: data.total_received(),
                    },
                )
            })
            .collect();

        let interfaces = networks
            .list()
            .iter()
            .map(|(name, data)| {
                let addresses = data
                    .ip_networks()
                    .iter()
                    .filter_map(|network| match network.addr {
                        IpAddr::V4(ip) => Some(ipv4_address(ip, network.prefix)),
                        IpAddr::V6(_) => None,
                    })
                    .collect();

                let current = counters[name];
                let (upload_bps, download_bps) = self.rates(name, current, now);

                (
                    name.clone(),
                    InterfaceInformation {
                        addresses,
                        io: IoInformation {
                            upload_bps,
                            download_bps,
                            total_upload: current.transmitted,
                            total_download: current.received,
                        },
                    },
                )
            })
            .collect();

        self.previous = Some((now, counters));
        interfaces
    }

    fn rates(&self, name: &str, current: Counters, now: Instant) -> (f64, f64) {
        let Some((at, counters)) = &self.previous else {
            return (0.0, 0.0);
        };
        let Some(before) = counters.get(name) else {
            return (0.0, 0.0);
        };

        let elapsed = now.duration_since(*at).as_secs_f64();
        if elapsed <= 0.0 {
            return (0.0, 0.0);
        }

        // counters may reset when an interface is re-created
        let sent = current.transmitted.saturating_sub(before.transmitted) as f64;
        let received = current.received.saturating_sub(before.received) as f64;
        (round1(sent / elapsed), round1(received / elapsed))
    }
}

#[async_trait]
impl MetricsSource for SysinfoSource {
    #[instrument(skip_all)]
    async fn snapshot(&mut self) -> anyhow::Result<Sample> {
        self.system.refresh_all();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();

        let sample = Sample {
            platform: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: System::os_version()
                .or_else(System::kernel_version)
                .unwrap_or_default(),
            cpu: self.cpu(),
            memory: self.memory(),
            disks: disks(),
            interfaces: self.interfaces(),
            boot_time: boot_time(System::boot_time()),
            process_count: self.system.processes().len() as u64,
        };

        debug!(
            "sampled host: cpu {}%, memory {}%, {} disks, {} interfaces",
            sample.cpu.percent_usage,
            sample.memory.percent,
            sample.disks.len(),
            sample.interfaces.len()
        );
        Ok(sample)
    }
}

fn disks() -> Vec<DiskInformation> {
    Disks::new_with_refreshed_list()
        .list()
        .iter()
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| {
            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);

            DiskInformation {
                device: disk.name().to_string_lossy().into_owned(),
                mountpoint: disk.mount_point().to_string_lossy().into_owned(),
                total,
                used,
                free,
                percent: percent_of(used, total),
            }
        })
        .collect()
}

fn ipv4_address(ip: Ipv4Addr, prefix: u8) -> AddressInformation {
    let mask = prefix_mask(prefix);
    let broadcast = u32::from(ip) | !mask;

    AddressInformation {
        ip: ip.to_string(),
        netmask: Some(Ipv4Addr::from(mask).to_string()),
        broadcast: (prefix < 31).then(|| Ipv4Addr::from(broadcast).to_string()),
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - p),
    }
}

fn boot_time(epoch_secs: u64) -> String {
    DateTime::from_timestamp(epoch_secs as i64, 0)
        .map(|boot| util::format_timestamp(&boot))
        .unwrap_or_default()
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
