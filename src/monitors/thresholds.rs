//! Stateless threshold evaluation of performance records
//!
//! Each category is compared with a strict `>`: a value equal to its
//! threshold does not alert. Network totals are summed over all interfaces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::storage::schema::{AlertRecord, PerformanceRecord};
use crate::{CpuInformation, DiskInformation, InterfaceInformation, MemoryInformation};

pub const DEFAULT_PERCENT_THRESHOLD: f64 = 80.0;

/// 1 GiB
pub const DEFAULT_TRAFFIC_THRESHOLD: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_percent")]
    pub cpu_threshold: f64,
    #[serde(default = "default_percent")]
    pub memory_threshold: f64,
    #[serde(default = "default_percent")]
    pub disk_threshold: f64,
    #[serde(default = "default_traffic")]
    pub upload_threshold: u64,
    #[serde(default = "default_traffic")]
    pub download_threshold: u64,
}

fn default_percent() -> f64 {
    DEFAULT_PERCENT_THRESHOLD
}

fn default_traffic() -> u64 {
    DEFAULT_TRAFFIC_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_threshold: default_percent(),
            memory_threshold: default_percent(),
            disk_threshold: default_percent(),
            upload_threshold: default_traffic(),
            download_threshold: default_traffic(),
        }
    }
}

/// Verdict for a single percentage category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub alert: bool,
    pub current_value: f64,
    pub threshold: f64,
}

impl Verdict {
    pub fn evaluate(current_value: f64, threshold: f64) -> Self {
        Self {
            alert: current_value > threshold,
            current_value,
            threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVerdict {
    pub upload_alert: bool,
    pub download_alert: bool,
    pub current_upload: u64,
    pub current_download: u64,
    pub upload_threshold: u64,
    pub download_threshold: u64,
}

impl NetworkVerdict {
    pub fn alert(&self) -> bool {
        self.upload_alert || self.download_alert
    }
}

/// Verdicts for every category of one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub cpu: Verdict,
    pub memory: Verdict,
    pub disk: Verdict,
    pub network: NetworkVerdict,
}

impl Evaluation {
    /// OR over all five category alerts
    pub fn is_valid_alert(&self) -> bool {
        self.cpu.alert || self.memory.alert || self.disk.alert || self.network.alert()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdEvaluator {
    thresholds: Thresholds,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn check_cpu(&self, cpu: &CpuInformation) -> Verdict {
        Verdict::evaluate(cpu.percent_usage, self.thresholds.cpu_threshold)
    }

    pub fn check_memory(&self, memory: &MemoryInformation) -> Verdict {
        Verdict::evaluate(memory.percent, self.thresholds.memory_threshold)
    }

    /// Uses the fullest disk. Without any disk the current value is `0.0`.
    pub fn check_disk(&self, disks: &[DiskInformation]) -> Verdict {
        Verdict::evaluate(crate::max_disk_percent(disks), self.thresholds.disk_threshold)
    }

    pub fn check_network(
        &self,
        interfaces: &BTreeMap<String, InterfaceInformation>,
    ) -> NetworkVerdict {
        let current_upload = crate::total_upload(interfaces);
        let current_download = crate::total_download(interfaces);

        NetworkVerdict {
            upload_alert: current_upload > self.thresholds.upload_threshold,
            download_alert: current_download > self.thresholds.download_threshold,
            current_upload,
            current_download,
            upload_threshold: self.thresholds.upload_threshold,
            download_threshold: self.thresholds.download_threshold,
        }
    }

    #[instrument(skip_all, fields(server_id = record.server_id))]
    pub fn evaluate(&self, record: &PerformanceRecord) -> Evaluation {
        let evaluation = Evaluation {
            cpu: self.check_cpu(&record.cpu),
            memory: self.check_memory(&record.memory),
            disk: self.check_disk(&record.disks),
            network: self.check_network(&record.interfaces),
        };
        trace!("evaluated record {}: {evaluation:?}", record.id);
        evaluation
    }

    /// Derives the alert row for a record (not yet persisted, `id` is 0)
    pub fn alert_for(&self, record: &PerformanceRecord) -> AlertRecord {
        AlertRecord::from_evaluation(record.server_id, record.timestamp, &self.evaluate(record))
    }
}
