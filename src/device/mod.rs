//! Device memory, streams and capture/replay
//!
//! Provides:
//! - Opaque handles for device buffers, streams, captured graphs and events
//! - The [`Device`] trait the benchmark engine drives
//! - An in-process loopback device backed by host memory

mod loopback;

pub use loopback::*;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────

/// Address of a device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Ordered queue of device work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Replayable capture of a stream's work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphHandle(pub u64);

/// Device-side timestamp marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Unit of work executed in stream order
pub type DeviceOp = Arc<dyn Fn() -> Result<()> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Device Trait
// ─────────────────────────────────────────────────────────────────

/// One accelerator as seen by a single rank
///
/// Work submitted to a stream runs asynchronously with respect to the host;
/// only [`Device::synchronize`] guarantees completion. While a stream is
/// capturing, submitted work is recorded instead of executed.
pub trait Device: Send + Sync {
    /// Device index on this node
    fn ordinal(&self) -> usize;

    /// Allocate `bytes` of zeroed device memory
    fn alloc(&self, bytes: usize) -> Result<DevicePtr>;

    /// Release an allocation
    fn free(&self, ptr: DevicePtr) -> Result<()>;

    /// Copy host data into an allocation, starting at its first byte
    fn write(&self, ptr: DevicePtr, data: &[u8]) -> Result<()>;

    /// Copy a whole allocation back to the host
    fn read(&self, ptr: DevicePtr) -> Result<Vec<u8>>;

    fn create_stream(&self) -> Result<StreamHandle>;

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()>;

    /// Block until all work submitted to `stream` has finished
    fn synchronize(&self, stream: StreamHandle) -> Result<()>;

    /// Start recording work submitted to `stream`
    fn begin_capture(&self, stream: StreamHandle) -> Result<()>;

    /// Stop recording and return the captured graph
    fn end_capture(&self, stream: StreamHandle) -> Result<GraphHandle>;

    /// Enqueue one replay of `graph` on `stream`
    fn launch_graph(&self, graph: GraphHandle, stream: StreamHandle) -> Result<()>;

    fn destroy_graph(&self, graph: GraphHandle) -> Result<()>;

    /// Enqueue a timestamp marker on `stream`
    fn record_event(&self, stream: StreamHandle) -> Result<EventHandle>;

    /// Milliseconds between two recorded events
    fn elapsed_ms(&self, start: EventHandle, end: EventHandle) -> Result<f64>;

    fn destroy_event(&self, event: EventHandle) -> Result<()>;
}
