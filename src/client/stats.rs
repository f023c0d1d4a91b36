//! Resource figures from engine stats samples.
//!
//! Samples are read from the engine's JSON stats shape, so the same math
//! serves the real engine and the synthetic one.

use crate::types::ResourceUsage;
use serde_json::Value;
use std::sync::Mutex;

/// The raw counters of one stats sample that the figures are computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system: u64,
    pub presystem: u64,
    pub online_cpus: u64,
    pub percpu_len: u64,
    pub memory_usage: u64,
    /// Page cache: `cache` under cgroup v1, `inactive_file` under v2.
    pub memory_cache: u64,
    pub memory_limit: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
}

fn u64_at(value: &Value, path: &[&str]) -> u64 {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

impl StatsSample {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Overwrites every field from one stats JSON document.
    pub fn fill_from(&mut self, stats: &Value) {
        self.clear();
        self.cpu_total = u64_at(stats, &["cpu_stats", "cpu_usage", "total_usage"]);
        self.precpu_total = u64_at(stats, &["precpu_stats", "cpu_usage", "total_usage"]);
        self.system = u64_at(stats, &["cpu_stats", "system_cpu_usage"]);
        self.presystem = u64_at(stats, &["precpu_stats", "system_cpu_usage"]);
        self.online_cpus = u64_at(stats, &["cpu_stats", "online_cpus"]);
        self.percpu_len = stats
            .pointer("/cpu_stats/cpu_usage/percpu_usage")
            .and_then(Value::as_array)
            .map_or(0, |per_cpu| per_cpu.len() as u64);

        self.memory_usage = u64_at(stats, &["memory_stats", "usage"]);
        self.memory_limit = u64_at(stats, &["memory_stats", "limit"]);
        self.memory_cache = match stats.pointer("/memory_stats/stats") {
            Some(detail) if detail.get("cache").is_some() => u64_at(detail, &["cache"]),
            Some(detail) => u64_at(detail, &["inactive_file"]),
            None => 0,
        };

        if let Some(networks) = stats.get("networks").and_then(Value::as_object) {
            for interface in networks.values() {
                self.net_rx += u64_at(interface, &["rx_bytes"]);
                self.net_tx += u64_at(interface, &["tx_bytes"]);
            }
        }
        if let Some(entries) = stats
            .pointer("/blkio_stats/io_service_bytes_recursive")
            .and_then(Value::as_array)
        {
            for entry in entries {
                let value = u64_at(entry, &["value"]);
                match entry.get("op").and_then(Value::as_str).map(str::to_ascii_lowercase) {
                    Some(op) if op == "read" => self.block_read += value,
                    Some(op) if op == "write" => self.block_write += value,
                    _ => {}
                }
            }
        }
        self.pids = u64_at(stats, &["pids_stats", "current"]);
    }

    /// `(cpuDelta / systemDelta) * onlineCPUs * 100`, zero when either delta
    /// is not positive.
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_total as f64 - self.precpu_total as f64;
        let system_delta = self.system as f64 - self.presystem as f64;
        if cpu_delta <= 0.0 || system_delta <= 0.0 {
            return 0.0;
        }
        let online = if self.online_cpus > 0 {
            self.online_cpus
        } else {
            self.percpu_len.max(1)
        };
        cpu_delta / system_delta * online as f64 * 100.0
    }

    /// `(usage - cache) / limit * 100`.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        self.used_memory() as f64 / self.memory_limit as f64 * 100.0
    }

    pub fn used_memory(&self) -> u64 {
        self.memory_usage.saturating_sub(self.memory_cache)
    }

    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: self.cpu_percent(),
            memory_usage: self.used_memory(),
            memory_limit: self.memory_limit,
            memory_percent: self.memory_percent(),
            net_rx: self.net_rx,
            net_tx: self.net_tx,
            block_read: self.block_read,
            block_write: self.block_write,
            pids: self.pids,
        }
    }
}

/// Reusable sample buffers. Samples come back zeroed.
#[derive(Debug)]
pub struct StatsPool {
    free: Mutex<Vec<StatsSample>>,
    capacity: usize,
}

impl StatsPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn take(&self) -> StatsSample {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default()
    }

    pub fn give(&self, mut sample: StatsSample) {
        sample.clear();
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity {
            free.push(sample);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_sample() -> Value {
        json!({
            "cpu_stats": {
                "cpu_usage": {"total_usage": 400_000_000u64, "percpu_usage": [1, 2]},
                "system_cpu_usage": 20_000_000_000u64,
                "online_cpus": 4
            },
            "precpu_stats": {
                "cpu_usage": {"total_usage": 200_000_000u64},
                "system_cpu_usage": 10_000_000_000u64
            },
            "memory_stats": {
                "usage": 300u64,
                "limit": 1000u64,
                "stats": {"cache": 100u64}
            },
            "networks": {
                "eth0": {"rx_bytes": 10u64, "tx_bytes": 20u64},
                "eth1": {"rx_bytes": 5u64, "tx_bytes": 1u64}
            },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    {"major": 8, "minor": 0, "op": "Read", "value": 7u64},
                    {"major": 8, "minor": 0, "op": "Write", "value": 3u64},
                    {"major": 8, "minor": 16, "op": "read", "value": 1u64},
                    {"major": 8, "minor": 0, "op": "Total", "value": 11u64}
                ]
            },
            "pids_stats": {"current": 12u64}
        })
    }

    #[test]
    fn test_cpu_and_memory_percent() {
        let mut sample = StatsSample::default();
        sample.fill_from(&v1_sample());
        // (200M / 10G) * 4 * 100
        assert!((sample.cpu_percent() - 8.0).abs() < 1e-9);
        assert!((sample.memory_percent() - 20.0).abs() < 1e-9);
        assert_eq!(sample.used_memory(), 200);
    }

    #[test]
    fn test_io_counters_are_summed() {
        let mut sample = StatsSample::default();
        sample.fill_from(&v1_sample());
        assert_eq!((sample.net_rx, sample.net_tx), (15, 21));
        assert_eq!((sample.block_read, sample.block_write), (8, 3));
        assert_eq!(sample.pids, 12);
    }

    #[test]
    fn test_cgroup_v2_uses_inactive_file() {
        let mut sample = StatsSample::default();
        sample.fill_from(&json!({
            "memory_stats": {"usage": 500u64, "limit": 1000u64, "stats": {"inactive_file": 250u64}}
        }));
        assert!((sample.memory_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_deltas_and_missing_fields() {
        let mut sample = StatsSample::default();
        sample.fill_from(&json!({}));
        assert_eq!(sample.cpu_percent(), 0.0);
        assert_eq!(sample.memory_percent(), 0.0);
    }

    #[test]
    fn test_falls_back_to_percpu_count() {
        let mut sample = StatsSample::default();
        let mut stats = v1_sample();
        stats["cpu_stats"]
            .as_object_mut()
            .unwrap()
            .remove("online_cpus");
        sample.fill_from(&stats);
        assert!((sample.cpu_percent() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_pool_returns_zeroed_samples() {
        let pool = StatsPool::new(2);
        let mut sample = pool.take();
        sample.fill_from(&v1_sample());
        pool.give(sample);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.take(), StatsSample::default());

        for _ in 0..5 {
            pool.give(StatsSample::default());
        }
        assert_eq!(pool.idle(), 2);
    }
}
