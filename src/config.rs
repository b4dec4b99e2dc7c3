//! Configuration system for collbench
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (COLLBENCH_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bench::{Aggregation, BenchSettings};
use crate::error::{Error, Result};
use crate::net::{NetworkEndpoint, DEFAULT_PORT};

/// Main harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Endpoint selection and rendezvous
    pub rendezvous: RendezvousSettings,

    /// Measurement parameters
    pub benchmark: BenchmarkSettings,

    /// Group shape
    pub cluster: ClusterSettings,

    /// Logging configuration
    pub logging: LoggingSettings,

    /// Report output
    pub report: ReportSettings,
}

/// Endpoint selection and rendezvous settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousSettings {
    /// Rank whose endpoint every rank connects to
    pub root_rank: usize,

    /// Port the collective engine listens on
    pub port: u16,

    /// Only consider addresses on this interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Skip interface discovery and use "<interface>:<ipv4>"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_endpoint: Option<String>,
}

/// Measurement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    /// Collective calls captured into one graph
    pub iterations: u32,

    /// Timed launches of the captured graph
    pub replays: u32,

    /// Untimed launches before timing
    pub warmup_launches: u32,

    /// Absolute tolerance per rank in the correctness check
    pub tolerance_per_rank: f64,

    /// Cross-rank latency aggregation
    pub aggregation: Aggregation,

    /// Multiplier between sweep sizes
    pub step_factor: u64,
}

/// Group shape settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Ranks started by the loopback launcher
    pub world_size: usize,

    /// Devices per node; rank r uses device r % devices_per_node
    pub devices_per_node: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

/// Report output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// JSON report written by rank 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

// Default implementations

impl Default for RendezvousSettings {
    fn default() -> Self {
        Self {
            root_rank: 0,
            port: DEFAULT_PORT,
            interface: None,
            static_endpoint: None,
        }
    }
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        let defaults = BenchSettings::default();
        Self {
            iterations: defaults.iterations,
            replays: defaults.replays,
            warmup_launches: defaults.warmup_launches,
            tolerance_per_rank: defaults.tolerance_per_rank,
            aggregation: defaults.aggregation,
            step_factor: 2,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            world_size: 2,
            devices_per_node: 8,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl BenchConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            Some(PathBuf::from("collbench.toml")),
            // User config directory
            dirs::config_dir().map(|p| p.join("collbench").join("config.toml")),
            // Home directory
            dirs::home_dir().map(|p| p.join(".collbench").join("config.toml")),
            // System config (Linux)
            Some(PathBuf::from("/etc/collbench/config.toml")),
        ];

        for path in search_paths.iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Rendezvous settings
        env_parse("COLLBENCH_ROOT_RANK", &mut self.rendezvous.root_rank);
        env_parse("COLLBENCH_PORT", &mut self.rendezvous.port);
        if let Ok(val) = std::env::var("COLLBENCH_INTERFACE") {
            self.rendezvous.interface = Some(val);
        }
        if let Ok(val) = std::env::var("COLLBENCH_STATIC_ENDPOINT") {
            self.rendezvous.static_endpoint = Some(val);
        }

        // Benchmark settings
        env_parse("COLLBENCH_ITERATIONS", &mut self.benchmark.iterations);
        env_parse("COLLBENCH_REPLAYS", &mut self.benchmark.replays);
        env_parse("COLLBENCH_WARMUP_LAUNCHES", &mut self.benchmark.warmup_launches);
        env_parse("COLLBENCH_TOLERANCE_PER_RANK", &mut self.benchmark.tolerance_per_rank);
        env_parse("COLLBENCH_AGGREGATION", &mut self.benchmark.aggregation);

        // Cluster settings
        env_parse("COLLBENCH_WORLD_SIZE", &mut self.cluster.world_size);
        env_parse("COLLBENCH_DEVICES_PER_NODE", &mut self.cluster.devices_per_node);

        // Logging settings
        if let Ok(val) = std::env::var("COLLBENCH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("COLLBENCH_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("COLLBENCH_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }

        // Report settings
        if let Ok(val) = std::env::var("COLLBENCH_REPORT") {
            self.report.output = Some(val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref output) = self.report.output {
            self.report.output = Some(expand_path(output));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.benchmark.iterations == 0 {
            return Err(Error::config_field_invalid(
                "benchmark.iterations",
                "must be at least 1",
            ));
        }
        if self.benchmark.replays == 0 {
            return Err(Error::config_field_invalid(
                "benchmark.replays",
                "must be at least 1",
            ));
        }
        let tolerance = self.benchmark.tolerance_per_rank;
        if tolerance.is_nan() || tolerance <= 0.0 {
            return Err(Error::config_field_invalid(
                "benchmark.tolerance_per_rank",
                "must be positive",
            ));
        }
        if self.benchmark.step_factor < 2 {
            return Err(Error::config_field_invalid(
                "benchmark.step_factor",
                "must be at least 2",
            ));
        }

        if self.cluster.world_size == 0 {
            return Err(Error::config_field_invalid(
                "cluster.world_size",
                "must be at least 1",
            ));
        }
        if self.cluster.devices_per_node == 0 {
            return Err(Error::config_field_invalid(
                "cluster.devices_per_node",
                "must be at least 1",
            ));
        }

        if self.rendezvous.root_rank >= self.cluster.world_size {
            return Err(Error::config_field_invalid(
                "rendezvous.root_rank",
                format!(
                    "root rank {} is outside a group of {} ranks",
                    self.rendezvous.root_rank, self.cluster.world_size
                ),
            ));
        }
        if self.rendezvous.port == 0 {
            return Err(Error::config_field_invalid("rendezvous.port", "must not be 0"));
        }
        self.static_endpoint()?;

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// The configured static endpoint, parsed
    pub fn static_endpoint(&self) -> Result<Option<NetworkEndpoint>> {
        self.rendezvous
            .static_endpoint
            .as_deref()
            .map(str::parse)
            .transpose()
    }

    /// Measurement settings for the runner
    pub fn bench_settings(&self, seed: u64) -> BenchSettings {
        BenchSettings {
            iterations: self.benchmark.iterations,
            replays: self.benchmark.replays,
            warmup_launches: self.benchmark.warmup_launches,
            tolerance_per_rank: self.benchmark.tolerance_per_rank,
            seed,
            aggregation: self.benchmark.aggregation,
        }
    }

    /// Report path, if any
    pub fn report_path(&self) -> Option<PathBuf> {
        self.report.output.as_ref().map(PathBuf::from)
    }
}

/// Overwrite `target` with a parsed environment variable, if set and valid
fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(variable = name, value = %val, "Ignoring unparsable override"),
        }
    }
}

/// Expand ~ and environment variables in paths
pub fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".collbench")
                .join("config.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# collbench configuration

[rendezvous]
# Rank whose endpoint address every rank connects to
root_rank = 0

# Port the collective engine listens on
port = 50000

# Only consider addresses on this interface (first routable match wins)
# interface = "ib0"

# Skip interface discovery entirely
# static_endpoint = "eth0:10.0.0.5"

[benchmark]
# Collective calls captured into one graph
iterations = 10

# Timed launches of the captured graph
replays = 10

# Untimed launches before timing starts
warmup_launches = 1

# Absolute tolerance per rank; the check uses tolerance_per_rank * world_size
tolerance_per_rank = 0.01

# Cross-rank latency aggregation: rank0, avg, min, max
aggregation = "avg"

# Multiplier between sizes when sweeping with --max_size
step_factor = 2

[cluster]
# Ranks started on this host
world_size = 2

# Rank r uses device r % devices_per_node
devices_per_node = 8

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.collbench/logs/collbench.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

[report]
# JSON report written by rank 0
# output = "collbench-report.json"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.rendezvous.root_rank, 0);
        assert_eq!(config.rendezvous.port, 50000);
        assert_eq!(config.benchmark.iterations, 10);
        assert_eq!(config.benchmark.replays, 10);
        assert_eq!(config.benchmark.aggregation, Aggregation::Avg);
        assert_eq!(config.cluster.world_size, 2);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        env::set_var("COLLBENCH_REPLAYS", "25");
        env::set_var("COLLBENCH_AGGREGATION", "max");
        env::set_var("COLLBENCH_PORT", "not-a-port");

        let mut config = BenchConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.benchmark.replays, 25);
        assert_eq!(config.benchmark.aggregation, Aggregation::Max);
        assert_eq!(config.rendezvous.port, 50000);

        env::remove_var("COLLBENCH_REPLAYS");
        env::remove_var("COLLBENCH_AGGREGATION");
        env::remove_var("COLLBENCH_PORT");
    }

    #[test]
    fn test_validation_rejects_zero_counts() {
        let mut config = BenchConfig::default();
        config.benchmark.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.benchmark.replays = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.cluster.world_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_root_rank_in_group() {
        let mut config = BenchConfig::default();
        config.rendezvous.root_rank = 2;
        match config.validate() {
            Err(Error::ConfigValidation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("rendezvous.root_rank"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validation_tolerance_and_level() {
        let mut config = BenchConfig::default();
        config.benchmark.tolerance_per_rank = 0.0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_static_endpoint() {
        let mut config = BenchConfig::default();
        assert!(config.static_endpoint().unwrap().is_none());

        config.rendezvous.static_endpoint = Some("eth0:10.0.0.5".into());
        assert_eq!(config.static_endpoint().unwrap().unwrap().interface(), "eth0");

        config.rendezvous.static_endpoint = Some("lo:127.0.0.1".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bench_settings() {
        let mut config = BenchConfig::default();
        config.benchmark.iterations = 3;
        let settings = config.bench_settings(9);
        assert_eq!(settings.iterations, 3);
        assert_eq!(settings.seed, 9);
        assert_eq!(settings.tolerance(4), 0.04);
    }

    #[test]
    fn test_default_file_matches_defaults() {
        let parsed: BenchConfig = toml::from_str(&generate_default_config()).unwrap();
        let defaults = BenchConfig::default();
        assert_eq!(parsed.rendezvous.port, defaults.rendezvous.port);
        assert_eq!(parsed.benchmark.iterations, defaults.benchmark.iterations);
        assert_eq!(parsed.benchmark.aggregation, defaults.benchmark.aggregation);
        assert_eq!(parsed.cluster.devices_per_node, defaults.cluster.devices_per_node);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[rendezvous]
root_rank = 1
interface = "ib0"

[benchmark]
iterations = 20
aggregation = "min"

[cluster]
world_size = 4
"#;

        let config: BenchConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.rendezvous.root_rank, 1);
        assert_eq!(config.rendezvous.interface.as_deref(), Some("ib0"));
        assert_eq!(config.benchmark.iterations, 20);
        assert_eq!(config.benchmark.replays, 10);
        assert_eq!(config.benchmark.aggregation, Aggregation::Min);
        assert_eq!(config.cluster.world_size, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("collbench.toml");
        let path_str = path.to_str().unwrap();

        assert_eq!(init_config(Some(path_str), false).unwrap(), path);
        assert!(init_config(Some(path_str), false).is_err());
        assert!(init_config(Some(path_str), true).is_ok());
    }
}
