//! Error types for collbench
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - The benchmark stage an error surfaced in
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::bench::Stage;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,
    InvalidSize = 110,
    UnknownDataType = 111,
    UnknownPacketType = 112,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,
    Serialization = 210,

    // Endpoint / rendezvous errors (3xx)
    NoEndpoint = 300,
    InvalidEndpoint = 301,
    InterfaceEnumeration = 302,
    RendezvousFailed = 310,
    GroupAborted = 311,

    // Correctness errors (5xx)
    CorrectnessMismatch = 500,

    // Timing errors (6xx)
    TimingFailed = 600,

    // Device / engine errors (7xx)
    DeviceError = 700,
    EngineError = 710,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Endpoint / rendezvous errors
            500..=599 => 50, // Correctness errors
            600..=699 => 60, // Timing errors
            700..=799 => 70, // Device errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Buffer size string could not be parsed
    #[error("Invalid size '{input}': {reason}")]
    InvalidSize { input: String, reason: String },

    /// Unknown element data type name
    #[error("Unknown data type: {0} (expected float16, float32 or int32)")]
    UnknownDataType(String),

    /// Unknown packet framing name
    #[error("Unknown packet type: {0} (expected LL8 or LL16)")]
    UnknownPacketType(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Endpoint / Rendezvous Errors
    // ─────────────────────────────────────────────────────────────

    /// No interface carries a routable IPv4 address
    #[error("Endpoint selection failed: {message}")]
    NoEndpoint { message: String },

    /// A configured or received endpoint is unusable
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Local interfaces could not be listed
    #[error("Failed to enumerate network interfaces")]
    InterfaceEnumeration {
        #[source]
        source: std::io::Error,
    },

    /// The group could not agree on a rendezvous address
    #[error("Rendezvous failed: {message}")]
    Rendezvous { message: String },

    /// Another rank failed and tore the process group down
    #[error("Process group aborted while rank {rank} was waiting on it")]
    GroupAborted { rank: usize },

    // ─────────────────────────────────────────────────────────────
    // Correctness Errors
    // ─────────────────────────────────────────────────────────────

    /// Collective result differs from the locally computed expectation
    #[error(
        "Result mismatch for plan '{plan}' on rank {rank}: {mismatches}/{total} elements outside \
         tolerance {tolerance} (first at index {first_index}: expected {expected}, got {actual})"
    )]
    CorrectnessMismatch {
        plan: String,
        rank: usize,
        mismatches: usize,
        total: usize,
        first_index: usize,
        expected: f64,
        actual: f64,
        tolerance: f64,
    },

    // ─────────────────────────────────────────────────────────────
    // Timing Errors
    // ─────────────────────────────────────────────────────────────

    /// Capture or replay measurement produced an unusable result
    #[error("Timing failed: {message}")]
    Timing { message: String },

    // ─────────────────────────────────────────────────────────────
    // Device / Engine Errors
    // ─────────────────────────────────────────────────────────────

    /// Device memory, stream, graph or event failure
    #[error("Device error: {message}")]
    Device { message: String },

    /// The collective engine rejected or failed a call
    #[error("Collective engine error: {message}")]
    Engine { message: String },

    // ─────────────────────────────────────────────────────────────
    // Stage Context
    // ─────────────────────────────────────────────────────────────

    /// An error annotated with the benchmark stage it surfaced in
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::InvalidSize { .. } => ErrorCode::InvalidSize,
            Error::UnknownDataType(_) => ErrorCode::UnknownDataType,
            Error::UnknownPacketType(_) => ErrorCode::UnknownPacketType,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::Serialization,
            Error::Json(_) => ErrorCode::Serialization,

            Error::NoEndpoint { .. } => ErrorCode::NoEndpoint,
            Error::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,
            Error::InterfaceEnumeration { .. } => ErrorCode::InterfaceEnumeration,
            Error::Rendezvous { .. } => ErrorCode::RendezvousFailed,
            Error::GroupAborted { .. } => ErrorCode::GroupAborted,

            Error::CorrectnessMismatch { .. } => ErrorCode::CorrectnessMismatch,

            Error::Timing { .. } => ErrorCode::TimingFailed,

            Error::Device { .. } => ErrorCode::DeviceError,
            Error::Engine { .. } => ErrorCode::EngineError,

            Error::Stage { source, .. } => source.code(),

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// The benchmark stage this error surfaced in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Strip any stage annotation
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self.root() {
            Error::ConfigNotFound { .. } => Some(
                "Run 'collbench config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'collbench config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::InvalidSize { .. } => Some(
                "Sizes are a whole number of bytes with an optional K, M or G suffix, e.g. 1M."
            ),
            Error::UnknownDataType(_) => Some("Choose one of: float16, float32, int32."),
            Error::UnknownPacketType(_) => Some("Choose one of: LL8, LL16."),

            Error::NoEndpoint { .. } => Some(
                "No interface has a routable IPv4 address. Set 'rendezvous.static_endpoint' \
                 (e.g. \"eth0:10.0.0.5\") or bring up a non-loopback interface."
            ),
            Error::InvalidEndpoint { .. } => Some(
                "Endpoints must be written as <interface>:<ipv4> and must not be loopback, \
                 link-local or multicast."
            ),
            Error::Rendezvous { .. } => Some(
                "The root rank could not publish its address. Run 'collbench endpoint' on the root host."
            ),

            Error::CorrectnessMismatch { .. } => Some(
                "The collective produced wrong data; timings are withheld. Check the execution plan \
                 matches the operation and world size."
            ),
            Error::Timing { .. } => Some(
                "Increase 'benchmark.iterations' or 'benchmark.replays' so the timed span is measurable."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid size error
    pub fn invalid_size(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidSize {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid endpoint error
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a rendezvous error
    pub fn rendezvous(message: impl Into<String>) -> Self {
        Error::Rendezvous {
            message: message.into(),
        }
    }

    /// Create a timing error
    pub fn timing(message: impl Into<String>) -> Self {
        Error::Timing {
            message: message.into(),
        }
    }

    /// Create a device error
    pub fn device(message: impl Into<String>) -> Self {
        Error::Device {
            message: message.into(),
        }
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine {
            message: message.into(),
        }
    }

    /// Annotate with a benchmark stage (an existing annotation is kept)
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ Error::Stage { .. } => already,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
