//! Point-in-time control-plane resource usage

use serde::{Deserialize, Serialize};

use crate::query::MetricKind;

/// CPU and memory of the API server and etcd at one phase boundary.
///
/// Every key is always present; missing data reads as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// API server CPU, in cores
    pub apiserver_cpu_cores: f64,
    /// API server working set, in bytes
    pub apiserver_mem_bytes: f64,
    /// etcd CPU, in cores
    pub etcd_cpu_cores: f64,
    /// etcd working set, in bytes
    pub etcd_mem_bytes: f64,
}

impl MetricsSnapshot {
    /// Value for one metric
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::ApiserverCpu => self.apiserver_cpu_cores,
            MetricKind::ApiserverMem => self.apiserver_mem_bytes,
            MetricKind::EtcdCpu => self.etcd_cpu_cores,
            MetricKind::EtcdMem => self.etcd_mem_bytes,
        }
    }

    /// Set one metric
    pub fn set(&mut self, kind: MetricKind, value: f64) {
        match kind {
            MetricKind::ApiserverCpu => self.apiserver_cpu_cores = value,
            MetricKind::ApiserverMem => self.apiserver_mem_bytes = value,
            MetricKind::EtcdCpu => self.etcd_cpu_cores = value,
            MetricKind::EtcdMem => self.etcd_mem_bytes = value,
        }
    }

    /// True when no metric has data
    pub fn is_all_zero(&self) -> bool {
        MetricKind::ALL.iter().all(|k| self.get(*k) == 0.0)
    }

    /// Per-metric difference `self - earlier`
    pub fn delta(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        let mut out = MetricsSnapshot::default();
        for kind in MetricKind::ALL {
            out.set(kind, self.get(kind) - earlier.get(kind));
        }
        out
    }
}
