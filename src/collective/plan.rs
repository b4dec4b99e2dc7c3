//! Execution plans and collective kinds

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Collective Kind
// ─────────────────────────────────────────────────────────────────

/// Collective operation family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectiveKind {
    /// Every rank ends with the elementwise sum of all contributions
    AllReduce,
    /// Every rank ends with the concatenation of all contributions
    AllGather,
}

impl CollectiveKind {
    /// Classify a plan by name
    ///
    /// Names mentioning `allgather` (any case) are all-gather plans; every
    /// other plan is treated as a reduction.
    pub fn from_plan_name(name: &str) -> Self {
        if name.to_ascii_lowercase().contains("allgather") {
            CollectiveKind::AllGather
        } else {
            CollectiveKind::AllReduce
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollectiveKind::AllReduce => "allreduce",
            CollectiveKind::AllGather => "allgather",
        }
    }

    /// Ratio of bus bandwidth to algorithm bandwidth for `world_size` ranks
    pub fn bus_factor(&self, world_size: usize) -> f64 {
        if world_size == 0 {
            return 0.0;
        }
        let w = world_size as f64;
        match self {
            CollectiveKind::AllReduce => 2.0 * (w - 1.0) / w,
            CollectiveKind::AllGather => (w - 1.0) / w,
        }
    }
}

impl fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution Plan
// ─────────────────────────────────────────────────────────────────

/// A named plan file the collective engine interprets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    name: String,
    path: PathBuf,
    kind: CollectiveKind,
}

impl ExecutionPlan {
    /// Describe a plan without touching the filesystem
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let kind = CollectiveKind::from_plan_name(&name);
        Self {
            name,
            path: path.into(),
            kind,
        }
    }

    /// Describe a plan whose file must exist
    pub fn load(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let plan = Self::new(name, path);
        let metadata = std::fs::metadata(&plan.path).map_err(|e| Error::IoRead {
            path: plan.path.clone(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(Error::config_field_invalid(
                "execution_plan_path",
                format!("{} is not a file", plan.path.display()),
            ));
        }
        Ok(plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CollectiveKind {
        self.kind
    }
}
