//! Benchmark reporting
//!
//! Latencies are combined across ranks using only the group broadcast,
//! converted to bandwidth figures, and optionally saved as JSON.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::{gather_scalars, ProcessGroup};
use crate::collective::CollectiveKind;
use crate::error::{Error, Result};
use crate::types::{DataType, PacketType};

// ─────────────────────────────────────────────────────────────────
// Aggregation
// ─────────────────────────────────────────────────────────────────

/// How per-rank latencies combine into the group figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Rank 0's own measurement
    Rank0,
    /// Mean over all ranks
    #[default]
    Avg,
    /// Fastest rank
    Min,
    /// Slowest rank
    Max,
}

impl Aggregation {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Rank0 => "rank0",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    /// Combine per-rank values ordered by rank
    pub fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Rank0 => values.first().copied().unwrap_or(f64::NAN),
            Aggregation::Avg if values.is_empty() => f64::NAN,
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rank0" | "0" => Ok(Aggregation::Rank0),
            "avg" | "1" => Ok(Aggregation::Avg),
            "min" | "2" => Ok(Aggregation::Min),
            "max" | "3" => Ok(Aggregation::Max),
            _ => Err(Error::config_field_invalid(
                "benchmark.aggregation",
                format!("'{}' is not one of rank0, avg, min, max", s),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Derived Figures
// ─────────────────────────────────────────────────────────────────

/// Algorithm and bus bandwidth in GB/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub algbw_gbps: f64,
    pub busbw_gbps: f64,
}

/// Bandwidth of moving `bytes` in `latency_us`
///
/// Bus bandwidth normalizes for the collective's traffic pattern so results
/// are comparable across world sizes.
pub fn bandwidth(kind: CollectiveKind, bytes: u64, world_size: usize, latency_us: f64) -> Bandwidth {
    if !(latency_us > 0.0) {
        return Bandwidth {
            algbw_gbps: 0.0,
            busbw_gbps: 0.0,
        };
    }
    let algbw_gbps = bytes as f64 / (latency_us * 1e-6) / 1e9;
    Bandwidth {
        algbw_gbps,
        busbw_gbps: algbw_gbps * kind.bus_factor(world_size),
    }
}

/// Fixed-width friendly latency: fewer decimals for larger values
pub fn format_time_us(us: f64) -> String {
    if us >= 10_000.0 {
        format!("{:.0}", us)
    } else if us >= 100.0 {
        format!("{:.1}", us)
    } else {
        format!("{:.2}", us)
    }
}

// ─────────────────────────────────────────────────────────────────
// Case Report
// ─────────────────────────────────────────────────────────────────

/// Everything measured for one case on one rank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub plan: String,
    pub kind: CollectiveKind,
    pub rank: usize,
    pub world_size: usize,
    pub in_place: bool,
    pub dtype: DataType,
    pub packet: PacketType,

    /// Bytes in this rank's input buffer
    pub size_bytes: u64,

    /// Per-rank element count
    pub element_count: usize,

    pub iterations: u32,
    pub replays: u32,
    pub elapsed_ms: f64,

    /// This rank's mean per-operation latency
    pub latency_us: f64,

    /// Group latency under `aggregation`
    pub group_latency_us: f64,
    pub aggregation: Aggregation,

    #[serde(flatten)]
    pub bandwidth: Bandwidth,
}

impl CaseReport {
    /// One-line per-rank summary
    pub fn summary_line(&self) -> String {
        format!(
            "Rank: {} Execution time: {} us, data size: {} bytes data type: {} packet type: {}",
            self.rank,
            format_time_us(self.latency_us),
            self.size_bytes,
            self.dtype,
            self.packet
        )
    }

    /// Row of the group table printed by rank 0
    pub fn table_row(&self) -> String {
        format!(
            "{:>12} {:>10} {:>8} {:>6} {:>9} {:>10} {:>8.2} {:>8.2}",
            self.size_bytes,
            self.element_count,
            self.dtype,
            self.packet,
            if self.in_place { "in" } else { "out" },
            format_time_us(self.group_latency_us),
            self.bandwidth.algbw_gbps,
            self.bandwidth.busbw_gbps
        )
    }

    pub fn table_header() -> String {
        format!(
            "{:>12} {:>10} {:>8} {:>6} {:>9} {:>10} {:>8} {:>8}",
            "size(B)", "count", "type", "packet", "placement", "time(us)", "algbw", "busbw"
        )
    }
}

/// Input to [`summarize`] from a finished timed replay
#[derive(Debug, Clone)]
pub struct CaseMeasurement {
    pub plan: String,
    pub kind: CollectiveKind,
    pub in_place: bool,
    pub dtype: DataType,
    pub packet: PacketType,
    pub size_bytes: u64,
    pub element_count: usize,

    /// Larger of the input and result buffer sizes
    pub traffic_bytes: u64,
    pub iterations: u32,
    pub replays: u32,
    pub elapsed_ms: f64,
    pub latency_us: f64,
}

/// Combine one rank's measurement with its peers'
///
/// Every rank must call this for the same case; it issues one broadcast per
/// rank.
pub fn summarize(
    group: &dyn ProcessGroup,
    measurement: CaseMeasurement,
    aggregation: Aggregation,
) -> Result<CaseReport> {
    let latencies = gather_scalars(group, measurement.latency_us)?;
    let group_latency_us = aggregation.apply(&latencies);
    let bandwidth = bandwidth(
        measurement.kind,
        measurement.traffic_bytes,
        group.world_size(),
        group_latency_us,
    );

    Ok(CaseReport {
        plan: measurement.plan,
        kind: measurement.kind,
        rank: group.rank(),
        world_size: group.world_size(),
        in_place: measurement.in_place,
        dtype: measurement.dtype,
        packet: measurement.packet,
        size_bytes: measurement.size_bytes,
        element_count: measurement.element_count,
        iterations: measurement.iterations,
        replays: measurement.replays,
        elapsed_ms: measurement.elapsed_ms,
        latency_us: measurement.latency_us,
        group_latency_us,
        aggregation,
        bandwidth,
    })
}

// ─────────────────────────────────────────────────────────────────
// Run Report
// ─────────────────────────────────────────────────────────────────

/// All cases of one run, as written to the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run finished
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Harness build that produced the report
    pub version: String,

    pub hostname: String,
    pub world_size: usize,
    pub engine: String,
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    pub fn new(world_size: usize, engine: impl Into<String>, cases: Vec<CaseReport>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            version: crate::version::build_info().full_version(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            world_size,
            engine: engine.into(),
            cases,
        }
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::IoWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(path = %path.display(), cases = self.cases.len(), "Benchmark report saved");
        Ok(())
    }
}
