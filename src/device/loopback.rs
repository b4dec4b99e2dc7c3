//! Loopback device
//!
//! Host-memory implementation of [`Device`] used when ranks run as threads
//! of one process. Work submitted outside a capture runs immediately on the
//! submitting thread, so `synchronize` only validates the stream. Captured
//! graphs replay their recorded work in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};

use super::{Device, DeviceOp, DevicePtr, EventHandle, GraphHandle, StreamHandle};

/// First address handed out by the allocator
const BASE_ADDRESS: u64 = 0x7f00_0000_0000;

/// Allocations are aligned like device allocations
const ALIGNMENT: u64 = 256;

// ─────────────────────────────────────────────────────────────────
// Loopback Configuration
// ─────────────────────────────────────────────────────────────────

/// Fault injection for exercising failure paths
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Every graph launch fails with a device error
    pub fail_graph_launch: bool,

    /// Events all carry the same timestamp, so elapsed time is zero
    pub frozen_clock: bool,
}

// ─────────────────────────────────────────────────────────────────
// Loopback Device
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StreamState {
    capture: Option<Vec<DeviceOp>>,
}

struct Inner {
    ordinal: usize,
    config: LoopbackConfig,
    epoch: Instant,
    next_address: AtomicU64,
    next_handle: AtomicU64,
    memory: Mutex<HashMap<u64, Vec<u8>>>,
    streams: Mutex<HashMap<u64, StreamState>>,
    graphs: Mutex<HashMap<u64, Arc<[DeviceOp]>>>,
    events: Mutex<HashMap<u64, Instant>>,
    graph_launches: AtomicU64,
}

/// Host-memory device; clones share the same memory and handles
#[derive(Clone)]
pub struct LoopbackDevice {
    inner: Arc<Inner>,
}

impl LoopbackDevice {
    /// Create a device with default behavior
    pub fn new(ordinal: usize) -> Self {
        Self::with_config(ordinal, LoopbackConfig::default())
    }

    /// Create a device with fault injection
    pub fn with_config(ordinal: usize, config: LoopbackConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ordinal,
                config,
                epoch: Instant::now(),
                next_address: AtomicU64::new(BASE_ADDRESS),
                next_handle: AtomicU64::new(1),
                memory: Mutex::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
                graphs: Mutex::new(HashMap::new()),
                events: Mutex::new(HashMap::new()),
                graph_launches: AtomicU64::new(0),
            }),
        }
    }

    /// Run `op` in stream order, or record it if the stream is capturing
    pub fn submit(&self, stream: StreamHandle, op: DeviceOp) -> Result<()> {
        {
            let mut streams = self.inner.streams.lock();
            let state = streams
                .get_mut(&stream.0)
                .ok_or_else(|| unknown("stream", stream.0))?;
            if let Some(ref mut recorded) = state.capture {
                recorded.push(op);
                return Ok(());
            }
        }
        op()
    }

    /// Copy `len` bytes starting `offset` bytes into an allocation
    pub fn read_range(&self, ptr: DevicePtr, offset: usize, len: usize) -> Result<Vec<u8>> {
        let memory = self.inner.memory.lock();
        let buf = memory.get(&ptr.0).ok_or_else(|| unknown("allocation", ptr.0))?;
        let end = checked_end(offset, len, buf.len(), ptr)?;
        Ok(buf[offset..end].to_vec())
    }

    /// Overwrite bytes starting `offset` bytes into an allocation
    pub fn write_range(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        let mut memory = self.inner.memory.lock();
        let buf = memory
            .get_mut(&ptr.0)
            .ok_or_else(|| unknown("allocation", ptr.0))?;
        let end = checked_end(offset, data.len(), buf.len(), ptr)?;
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Total graph launches so far
    pub fn graph_launches(&self) -> u64 {
        self.inner.graph_launches.load(Ordering::Relaxed)
    }

    /// Number of allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.inner.memory.lock().len()
    }

    /// Number of streams not yet destroyed
    pub fn live_streams(&self) -> usize {
        self.inner.streams.lock().len()
    }

    fn handle(&self) -> u64 {
        self.inner.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_not_capturing(&self, stream: StreamHandle, what: &str) -> Result<()> {
        let streams = self.inner.streams.lock();
        let state = streams.get(&stream.0).ok_or_else(|| unknown("stream", stream.0))?;
        if state.capture.is_some() {
            return Err(Error::device(format!(
                "{} is not allowed while stream {} is capturing",
                what, stream.0
            )));
        }
        Ok(())
    }
}

fn unknown(kind: &str, id: u64) -> Error {
    Error::device(format!("unknown {} {:#x}", kind, id))
}

fn checked_end(offset: usize, len: usize, capacity: usize, ptr: DevicePtr) -> Result<usize> {
    offset
        .checked_add(len)
        .filter(|&end| end <= capacity)
        .ok_or_else(|| {
            Error::device(format!(
                "access of {} bytes at offset {} overruns allocation {} of {} bytes",
                len, offset, ptr, capacity
            ))
        })
}

impl Device for LoopbackDevice {
    fn ordinal(&self) -> usize {
        self.inner.ordinal
    }

    fn alloc(&self, bytes: usize) -> Result<DevicePtr> {
        let span = (bytes.max(1) as u64).div_ceil(ALIGNMENT) * ALIGNMENT;
        let address = self.inner.next_address.fetch_add(span, Ordering::Relaxed);
        self.inner.memory.lock().insert(address, vec![0; bytes]);
        trace!(ordinal = self.inner.ordinal, bytes, address = %DevicePtr(address), "Allocated");
        Ok(DevicePtr(address))
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.inner
            .memory
            .lock()
            .remove(&ptr.0)
            .map(|_| ())
            .ok_or_else(|| unknown("allocation", ptr.0))
    }

    fn write(&self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        self.write_range(ptr, 0, data)
    }

    fn read(&self, ptr: DevicePtr) -> Result<Vec<u8>> {
        self.inner
            .memory
            .lock()
            .get(&ptr.0)
            .cloned()
            .ok_or_else(|| unknown("allocation", ptr.0))
    }

    fn create_stream(&self) -> Result<StreamHandle> {
        let id = self.handle();
        self.inner.streams.lock().insert(id, StreamState::default());
        Ok(StreamHandle(id))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        match self.inner.streams.lock().remove(&stream.0) {
            Some(state) if state.capture.is_some() => Err(Error::device(format!(
                "stream {} destroyed while capturing",
                stream.0
            ))),
            Some(_) => Ok(()),
            None => Err(unknown("stream", stream.0)),
        }
    }

    fn synchronize(&self, stream: StreamHandle) -> Result<()> {
        self.ensure_not_capturing(stream, "synchronize")
    }

    fn begin_capture(&self, stream: StreamHandle) -> Result<()> {
        let mut streams = self.inner.streams.lock();
        let state = streams
            .get_mut(&stream.0)
            .ok_or_else(|| unknown("stream", stream.0))?;
        if state.capture.is_some() {
            return Err(Error::device(format!("stream {} is already capturing", stream.0)));
        }
        state.capture = Some(Vec::new());
        Ok(())
    }

    fn end_capture(&self, stream: StreamHandle) -> Result<GraphHandle> {
        let recorded = {
            let mut streams = self.inner.streams.lock();
            let state = streams
                .get_mut(&stream.0)
                .ok_or_else(|| unknown("stream", stream.0))?;
            state.capture.take().ok_or_else(|| {
                Error::device(format!("stream {} is not capturing", stream.0))
            })?
        };

        let id = self.handle();
        trace!(graph = id, ops = recorded.len(), "Captured graph");
        self.inner.graphs.lock().insert(id, recorded.into());
        Ok(GraphHandle(id))
    }

    fn launch_graph(&self, graph: GraphHandle, stream: StreamHandle) -> Result<()> {
        if self.inner.config.fail_graph_launch {
            return Err(Error::device(format!("launch of graph {} failed", graph.0)));
        }
        self.ensure_not_capturing(stream, "graph launch")?;

        let ops = self
            .inner
            .graphs
            .lock()
            .get(&graph.0)
            .cloned()
            .ok_or_else(|| unknown("graph", graph.0))?;

        self.inner.graph_launches.fetch_add(1, Ordering::Relaxed);
        for op in ops.iter() {
            op()?;
        }
        Ok(())
    }

    fn destroy_graph(&self, graph: GraphHandle) -> Result<()> {
        self.inner
            .graphs
            .lock()
            .remove(&graph.0)
            .map(|_| ())
            .ok_or_else(|| unknown("graph", graph.0))
    }

    fn record_event(&self, stream: StreamHandle) -> Result<EventHandle> {
        self.ensure_not_capturing(stream, "event record")?;
        let stamp = if self.inner.config.frozen_clock {
            self.inner.epoch
        } else {
            Instant::now()
        };
        let id = self.handle();
        self.inner.events.lock().insert(id, stamp);
        Ok(EventHandle(id))
    }

    fn elapsed_ms(&self, start: EventHandle, end: EventHandle) -> Result<f64> {
        let events = self.inner.events.lock();
        let start = *events.get(&start.0).ok_or_else(|| unknown("event", start.0))?;
        let end = *events.get(&end.0).ok_or_else(|| unknown("event", end.0))?;
        let ms = if end >= start {
            end.duration_since(start).as_secs_f64() * 1000.0
        } else {
            -(start.duration_since(end).as_secs_f64() * 1000.0)
        };
        Ok(ms)
    }

    fn destroy_event(&self, event: EventHandle) -> Result<()> {
        self.inner
            .events
            .lock()
            .remove(&event.0)
            .map(|_| ())
            .ok_or_else(|| unknown("event", event.0))
    }
}
