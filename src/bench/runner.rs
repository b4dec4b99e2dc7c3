//! Benchmark runner
//!
//! Drives one case through Setup, CorrectnessCheck, WarmUp, TimedReplay and
//! Report. Timing uses a captured graph of `iterations` collective calls that
//! is replayed back to back between two device events, so launch and
//! dispatch overhead is amortized over every call in the span.

use tracing::{debug, info};

use crate::collective::{BufferRole, ExecuteRequest, RolePair};
use crate::device::{Device, DevicePtr, GraphHandle, StreamHandle};
use crate::error::{Error, Result};
use crate::types::DataType;

use super::{
    allclose, prepare_case_data, summarize, BenchContext, BenchSettings, CaseMeasurement,
    CaseReport, OperationCase, Stage, RELATIVE_TOLERANCE,
};

// ─────────────────────────────────────────────────────────────────
// Samples and Buffers
// ─────────────────────────────────────────────────────────────────

/// Raw result of one timed replay span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkSample {
    /// Calls recorded into the graph
    pub iterations: u32,

    /// Times the graph was launched inside the span
    pub replays: u32,

    /// Device time between the span's start and end events
    pub elapsed_ms: f64,
}

impl BenchmarkSample {
    /// Mean latency of a single collective call in microseconds
    pub fn mean_latency_us(&self) -> Result<f64> {
        let calls = u64::from(self.iterations) * u64::from(self.replays);
        if calls == 0 {
            return Err(Error::timing(format!(
                "nothing was timed ({} iterations x {} replays)",
                self.iterations, self.replays
            )));
        }
        if !(self.elapsed_ms > 0.0 && self.elapsed_ms.is_finite()) {
            return Err(Error::timing(format!(
                "elapsed time of {} ms over {} calls is not positive",
                self.elapsed_ms, calls
            )));
        }
        Ok(self.elapsed_ms * 1000.0 / calls as f64)
    }
}

/// A device allocation and how its bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub ptr: DevicePtr,

    /// Length in elements
    pub len: usize,
    pub dtype: DataType,
    pub bytes: usize,
}

impl DeviceBuffer {
    /// Allocate a buffer holding `data`
    fn upload(device: &dyn Device, dtype: DataType, data: &[u8]) -> Result<Self> {
        let ptr = device.alloc(data.len())?;
        if let Err(e) = device.write(ptr, data) {
            let _ = device.free(ptr);
            return Err(e);
        }
        Ok(Self {
            ptr,
            len: data.len() / dtype.size(),
            dtype,
            bytes: data.len(),
        })
    }
}

/// Buffers and expectations of a case after setup
struct PreparedCase {
    send: DeviceBuffer,
    recv: DeviceBuffer,
    roles: RolePair,
    expected: Vec<f64>,
}

impl PreparedCase {
    fn buffer(&self, role: BufferRole) -> DeviceBuffer {
        match role {
            BufferRole::Send => self.send,
            BufferRole::Recv => self.recv,
        }
    }

    fn request<'a>(
        &self,
        ctx: &BenchContext,
        case: &'a OperationCase,
        stream: StreamHandle,
    ) -> ExecuteRequest<'a> {
        let input = self.buffer(self.roles.input);
        let result = self.buffer(self.roles.result);
        ExecuteRequest {
            rank: ctx.rank(),
            input: input.ptr,
            output: result.ptr,
            input_bytes: input.bytes,
            output_bytes: result.bytes,
            dtype: case.dtype,
            plan: &case.plan,
            stream,
            packet: case.packet,
        }
    }

    fn release(&self, device: &dyn Device) -> Result<()> {
        let send = device.free(self.send.ptr);
        let recv = device.free(self.recv.ptr);
        send.and(recv)
    }
}

// ─────────────────────────────────────────────────────────────────
// Benchmark Runner
// ─────────────────────────────────────────────────────────────────

/// Runs operation cases against a [`BenchContext`]
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRunner {
    settings: BenchSettings,
}

impl BenchmarkRunner {
    pub fn new(settings: BenchSettings) -> Self {
        Self { settings }
    }

    /// Run every stage of one case
    ///
    /// Every rank of the group must run the same cases in the same order.
    /// Errors carry the stage they happened in; nothing is retried.
    pub fn run_case(&self, ctx: &BenchContext, case: &OperationCase) -> Result<CaseReport> {
        info!(rank = ctx.rank(), case = %case, "Starting case");

        let prepared = self
            .setup(ctx, case)
            .map_err(|e| e.in_stage(Stage::Setup))?;

        let measured = self.verify_and_time(ctx, case, &prepared);
        let released = prepared.release(ctx.device());
        let (sample, latency_us) = measured?;
        released.map_err(|e| e.in_stage(Stage::Report))?;

        let input = prepared.buffer(prepared.roles.input);
        let result = prepared.buffer(prepared.roles.result);
        let measurement = CaseMeasurement {
            plan: case.plan.name().to_string(),
            kind: case.kind(),
            in_place: case.in_place,
            dtype: case.dtype,
            packet: case.packet,
            size_bytes: prepared.send.bytes as u64,
            element_count: case.element_count(),
            traffic_bytes: input.bytes.max(result.bytes) as u64,
            iterations: sample.iterations,
            replays: sample.replays,
            elapsed_ms: sample.elapsed_ms,
            latency_us,
        };

        let report = summarize(ctx.group(), measurement, self.settings.aggregation)
            .map_err(|e| e.in_stage(Stage::Report))?;
        info!(
            rank = report.rank,
            latency_us = report.latency_us,
            group_latency_us = report.group_latency_us,
            busbw_gbps = report.bandwidth.busbw_gbps,
            "Case complete"
        );
        Ok(report)
    }

    fn verify_and_time(
        &self,
        ctx: &BenchContext,
        case: &OperationCase,
        prepared: &PreparedCase,
    ) -> Result<(BenchmarkSample, f64)> {
        self.correctness_check(ctx, case, prepared)
            .map_err(|e| e.in_stage(Stage::CorrectnessCheck))?;

        let graph = self
            .capture(ctx, case, prepared)
            .map_err(|e| e.in_stage(Stage::WarmUp))?;

        let timed = self
            .warm_up(ctx, graph)
            .map_err(|e| e.in_stage(Stage::WarmUp))
            .and_then(|_| {
                self.timed_replay(ctx, graph)
                    .map_err(|e| e.in_stage(Stage::TimedReplay))
            });
        let destroyed = ctx.device().destroy_graph(graph);

        let timed = timed?;
        destroyed.map_err(|e| e.in_stage(Stage::TimedReplay))?;
        Ok(timed)
    }

    // ─────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────

    fn setup(&self, ctx: &BenchContext, case: &OperationCase) -> Result<PreparedCase> {
        case.validate(ctx.world_size())?;
        let data = prepare_case_data(
            case.kind(),
            case.dtype,
            case.in_place,
            case.element_count(),
            ctx.rank(),
            ctx.world_size(),
            self.settings.seed,
        );

        let device = ctx.device();
        let send = DeviceBuffer::upload(device, case.dtype, &data.send)?;
        let recv = match DeviceBuffer::upload(device, case.dtype, &data.recv) {
            Ok(recv) => recv,
            Err(e) => {
                let _ = device.free(send.ptr);
                return Err(e);
            }
        };

        let prepared = PreparedCase {
            send,
            recv,
            roles: case.roles(),
            expected: data.expected,
        };
        debug!(
            rank = ctx.rank(),
            send_bytes = send.bytes,
            recv_bytes = recv.bytes,
            input = %prepared.roles.input,
            result = %prepared.roles.result,
            aliased = prepared.roles.aliased(),
            "Buffers ready"
        );

        if let Err(e) = ctx.group().barrier() {
            let _ = prepared.release(device);
            return Err(e);
        }
        Ok(prepared)
    }

    fn correctness_check(
        &self,
        ctx: &BenchContext,
        case: &OperationCase,
        prepared: &PreparedCase,
    ) -> Result<()> {
        let stream = ctx.stream()?;
        ctx.engine().execute(&prepared.request(ctx, case, stream))?;
        ctx.device().synchronize(stream)?;

        let result = prepared.buffer(prepared.roles.result);
        let actual = result.dtype.decode(&ctx.device().read(result.ptr)?);
        let tolerance = self.settings.tolerance(ctx.world_size());
        let comparison = allclose(&actual, &prepared.expected, tolerance, RELATIVE_TOLERANCE);

        if let Some(first) = comparison.first {
            return Err(Error::CorrectnessMismatch {
                plan: case.plan.name().to_string(),
                rank: ctx.rank(),
                mismatches: comparison.mismatches,
                total: comparison.total,
                first_index: first.index,
                expected: first.expected,
                actual: first.actual,
                tolerance,
            });
        }
        debug!(rank = ctx.rank(), elements = comparison.total, tolerance, "Result verified");

        // No rank starts timing until every rank has verified
        ctx.group().barrier()
    }

    fn capture(
        &self,
        ctx: &BenchContext,
        case: &OperationCase,
        prepared: &PreparedCase,
    ) -> Result<GraphHandle> {
        let device = ctx.device();
        let stream = ctx.stream()?;
        let request = prepared.request(ctx, case, stream);

        device.begin_capture(stream)?;
        let issued = (0..self.settings.iterations).try_for_each(|_| ctx.engine().execute(&request));
        let graph = device.end_capture(stream)?;

        if let Err(e) = issued {
            let _ = device.destroy_graph(graph);
            return Err(e);
        }
        debug!(rank = ctx.rank(), calls = self.settings.iterations, "Captured graph");
        Ok(graph)
    }

    fn warm_up(&self, ctx: &BenchContext, graph: GraphHandle) -> Result<()> {
        let stream = ctx.stream()?;
        for _ in 0..self.settings.warmup_launches {
            ctx.device().launch_graph(graph, stream)?;
        }
        ctx.device().synchronize(stream)
    }

    fn timed_replay(&self, ctx: &BenchContext, graph: GraphHandle) -> Result<(BenchmarkSample, f64)> {
        let device = ctx.device();
        let stream = ctx.stream()?;

        let start = device.record_event(stream)?;
        let span = (0..self.settings.replays)
            .try_for_each(|_| device.launch_graph(graph, stream))
            .and_then(|_| device.record_event(stream));
        let end = match span {
            Ok(end) => end,
            Err(e) => {
                let _ = device.destroy_event(start);
                return Err(e);
            }
        };

        let elapsed = device
            .synchronize(stream)
            .and_then(|_| device.elapsed_ms(start, end));
        let _ = device.destroy_event(start);
        let _ = device.destroy_event(end);

        let sample = BenchmarkSample {
            iterations: self.settings.iterations,
            replays: self.settings.replays,
            elapsed_ms: elapsed?,
        };
        let latency_us = sample.mean_latency_us()?;
        debug!(
            rank = ctx.rank(),
            elapsed_ms = sample.elapsed_ms,
            latency_us,
            "Timed replay finished"
        );
        Ok((sample, latency_us))
    }
}
