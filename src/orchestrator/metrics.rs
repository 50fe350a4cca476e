//! Resource usage of an instance, summed from the metrics API.

use super::InstanceOrchestrator;
use crate::cluster::ContainerUsage;
use crate::error::Result;
use crate::resources::labels;
use crate::types::ResourceUsage;
use futures::future::join_all;
use tracing::{instrument, warn};

const KI: u64 = 1024;
const MI: u64 = KI * 1024;
const GI: u64 = MI * 1024;
const TI: u64 = GI * 1024;

impl InstanceOrchestrator {
    /// Sum cpu and memory of every container of every pod in the namespace.
    ///
    /// A pod whose metrics cannot be fetched contributes zero.
    #[instrument(skip(self))]
    pub async fn metrics(&self, namespace: &str) -> Result<ResourceUsage> {
        let pods = self
            .cluster
            .list_pods(namespace, &labels::pod_selector(namespace))
            .await?;

        let names: Vec<String> = pods.iter().filter_map(|p| p.metadata.name.clone()).collect();
        let fetched = join_all(
            names
                .iter()
                .map(|name| self.cluster.pod_metrics(namespace, name)),
        )
        .await;

        let mut total = ResourceUsage::default();
        for (name, result) in names.iter().zip(fetched) {
            match result {
                Ok(containers) => total += container_usage(&containers),
                Err(e) => {
                    warn!(pod = %name, error = %e, "Pod metrics unavailable, counting as zero")
                }
            }
        }
        Ok(total)
    }
}

/// Usage of one pod from its per-container samples
pub fn container_usage(containers: &[ContainerUsage]) -> ResourceUsage {
    let mut usage = ResourceUsage::default();
    for container in containers {
        if let Some(cpu) = container.usage.get("cpu") {
            usage.cpu_millis += parse_cpu(cpu).unwrap_or_else(|| {
                warn!(container = %container.name, value = %cpu, "Unparseable cpu quantity");
                0
            });
        }
        if let Some(memory) = container.usage.get("memory") {
            usage.memory_bytes += parse_memory(memory).unwrap_or_else(|| {
                warn!(container = %container.name, value = %memory, "Unparseable memory quantity");
                0
            });
        }
    }
    usage
}

/// Parse a cpu quantity into milli-cores.
///
/// `m` is milli-cores as given, no suffix is whole cores; `u` and `n` are micro and
/// nano cores as reported by metrics-server.
pub fn parse_cpu(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, divisor) = if let Some(n) = value.strip_suffix('n') {
        (n, 1_000_000.0)
    } else if let Some(u) = value.strip_suffix('u') {
        (u, 1_000.0)
    } else if let Some(m) = value.strip_suffix('m') {
        (m, 1.0)
    } else {
        (value, 0.001)
    };
    to_units(number, 1.0 / divisor)
}

/// Parse a memory quantity into bytes.
///
/// `Ki`, `Mi`, `Gi` and `Ti` are powers of 1024, `k`, `M`, `G` and `T` powers of 1000,
/// no suffix is bytes.
pub fn parse_memory(value: &str) -> Option<u64> {
    let value = value.trim();
    let suffixes: [(&str, u64); 8] = [
        ("Ki", KI),
        ("Mi", MI),
        ("Gi", GI),
        ("Ti", TI),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    for (suffix, multiplier) in suffixes {
        if let Some(number) = value.strip_suffix(suffix) {
            return to_units(number, multiplier as f64);
        }
    }
    to_units(value, 1.0)
}

fn to_units(number: &str, multiplier: f64) -> Option<u64> {
    if number.is_empty() {
        return None;
    }
    let parsed: f64 = number.parse().ok()?;
    if !parsed.is_finite() || parsed < 0.0 {
        return None;
    }
    Some((parsed * multiplier).round() as u64)
}

pub fn format_cpu(millis: u64) -> String {
    format!("{millis}m")
}

/// Largest binary unit that represents the value exactly
pub fn format_memory(bytes: u64) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GI == 0 => format!("{}Gi", b / GI),
        b if b % MI == 0 => format!("{}Mi", b / MI),
        b if b % KI == 0 => format!("{}Ki", b / KI),
        b => b.to_string(),
    }
}
