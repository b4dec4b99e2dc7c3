//! Loopback collective engine
//!
//! Ranks living in the same process exchange contributions through a shared
//! fabric keyed by rendezvous address. Each call is submitted to the
//! caller's stream as a device op, so it is captured and replayed like a
//! real kernel launch.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::device::{DeviceOp, DevicePtr, LoopbackDevice};
use crate::error::{Error, Result};
use crate::net::RendezvousAddress;
use crate::types::DataType;

use super::{CollectiveEngine, CollectiveKind, EngineConnector, ExecuteRequest};

// ─────────────────────────────────────────────────────────────────
// Exchange Fabric
// ─────────────────────────────────────────────────────────────────

struct ExchangeFabric {
    world_size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
}

impl ExchangeFabric {
    fn new(world_size: usize) -> Self {
        Self {
            world_size,
            barrier: Barrier::new(world_size),
            slots: Mutex::new(vec![Vec::new(); world_size]),
        }
    }

    /// Publish this rank's contribution and return what every rank published
    ///
    /// All ranks pass both barriers even when their own contribution failed,
    /// so one bad rank cannot strand the others.
    fn exchange<T>(
        &self,
        rank: usize,
        contribution: Result<Vec<u8>>,
        combine: impl FnOnce(&[Vec<u8>]) -> Result<T>,
    ) -> Result<T> {
        let (published, failure) = match contribution {
            Ok(bytes) => (bytes, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        self.slots.lock()[rank] = published;
        self.barrier.wait();
        let combined = combine(&self.slots.lock());
        self.barrier.wait();

        match failure {
            Some(e) => Err(e),
            None => combined,
        }
    }
}

/// Process-wide registry of fabrics, one per rendezvous address
#[derive(Clone, Default)]
pub struct LoopbackHub {
    fabrics: Arc<Mutex<HashMap<(Ipv4Addr, u16), Arc<ExchangeFabric>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(&self, address: &RendezvousAddress, world_size: usize) -> Result<Arc<ExchangeFabric>> {
        let mut fabrics = self.fabrics.lock();
        let fabric = fabrics
            .entry((address.ip, address.port))
            .or_insert_with(|| Arc::new(ExchangeFabric::new(world_size)));
        if fabric.world_size != world_size {
            return Err(Error::engine(format!(
                "group at {}:{} has {} ranks, joiner expects {}",
                address.ip, address.port, fabric.world_size, world_size
            )));
        }
        Ok(fabric.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────

/// Connects one rank's loopback device to the hub
pub struct LoopbackConnector {
    hub: LoopbackHub,
    device: LoopbackDevice,
}

impl LoopbackConnector {
    pub fn new(hub: LoopbackHub, device: LoopbackDevice) -> Self {
        Self { hub, device }
    }
}

impl EngineConnector for LoopbackConnector {
    fn connect(
        &self,
        address: &RendezvousAddress,
        rank: usize,
        world_size: usize,
    ) -> Result<Box<dyn CollectiveEngine>> {
        if rank >= world_size {
            return Err(Error::engine(format!(
                "rank {} outside group of {}",
                rank, world_size
            )));
        }
        let fabric = self.hub.join(address, world_size)?;
        debug!(rank, world_size, address = %address, "Joined loopback group");
        Ok(Box::new(LoopbackEngine {
            rank,
            world_size,
            device: self.device.clone(),
            fabric,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────

/// In-process collective engine for one rank
pub struct LoopbackEngine {
    rank: usize,
    world_size: usize,
    device: LoopbackDevice,
    fabric: Arc<ExchangeFabric>,
}

impl LoopbackEngine {
    fn validate(&self, request: &ExecuteRequest<'_>) -> Result<()> {
        if request.rank != self.rank {
            return Err(Error::engine(format!(
                "request for rank {} sent to engine of rank {}",
                request.rank, self.rank
            )));
        }

        let in_place = request.input == request.output;
        let dtype_size = request.dtype.size();
        if request.input_bytes % dtype_size != 0 || request.output_bytes % dtype_size != 0 {
            return Err(Error::engine(format!(
                "buffer sizes {}/{} are not multiples of the {} element size",
                request.input_bytes, request.output_bytes, request.dtype
            )));
        }

        match request.plan.kind() {
            CollectiveKind::AllReduce if request.input_bytes != request.output_bytes => {
                Err(Error::engine(format!(
                    "all-reduce needs equal buffers, got {} and {} bytes",
                    request.input_bytes, request.output_bytes
                )))
            }
            CollectiveKind::AllGather if request.output_bytes % self.world_size != 0 => {
                Err(Error::engine(format!(
                    "all-gather output of {} bytes does not split across {} ranks",
                    request.output_bytes, self.world_size
                )))
            }
            CollectiveKind::AllGather
                if !in_place && request.input_bytes * self.world_size != request.output_bytes =>
            {
                Err(Error::engine(format!(
                    "all-gather input of {} bytes does not match output of {} bytes over {} ranks",
                    request.input_bytes, request.output_bytes, self.world_size
                )))
            }
            _ => Ok(()),
        }
    }
}

impl CollectiveEngine for LoopbackEngine {
    fn execute(&self, request: &ExecuteRequest<'_>) -> Result<()> {
        self.validate(request)?;
        trace!(
            rank = self.rank,
            plan = request.plan.name(),
            bytes = request.input_bytes,
            packet = %request.packet,
            "Submitting collective"
        );

        let op: DeviceOp = match request.plan.kind() {
            CollectiveKind::AllReduce => {
                all_reduce_op(self, request.dtype, request.input, request.output, request.output_bytes)
            }
            CollectiveKind::AllGather => {
                all_gather_op(self, request.input, request.output, request.output_bytes)
            }
        };
        self.device.submit(request.stream, op)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

fn all_reduce_op(
    engine: &LoopbackEngine,
    dtype: DataType,
    input: DevicePtr,
    output: DevicePtr,
    bytes: usize,
) -> DeviceOp {
    let (rank, device, fabric) = (engine.rank, engine.device.clone(), engine.fabric.clone());
    Arc::new(move || {
        let contribution = device.read_range(input, 0, bytes);
        let sum = fabric.exchange(rank, contribution, |slots| {
            if slots.iter().any(|s| s.len() != bytes) {
                return Err(Error::engine("all-reduce contributions differ in size"));
            }
            // Rank order keeps every rank's rounding identical
            let mut acc = slots[0].clone();
            for other in &slots[1..] {
                dtype.accumulate(&mut acc, other);
            }
            Ok(acc)
        })?;
        device.write_range(output, 0, &sum)
    })
}

fn all_gather_op(
    engine: &LoopbackEngine,
    input: DevicePtr,
    output: DevicePtr,
    output_bytes: usize,
) -> DeviceOp {
    let (rank, device, fabric) = (engine.rank, engine.device.clone(), engine.fabric.clone());
    let chunk = output_bytes / engine.world_size;
    Arc::new(move || {
        let contribution = if input == output {
            device.read_range(output, rank * chunk, chunk)
        } else {
            device.read_range(input, 0, chunk)
        };
        let gathered = fabric.exchange(rank, contribution, |slots| {
            if slots.iter().any(|s| s.len() != chunk) {
                return Err(Error::engine("all-gather contributions differ in size"));
            }
            Ok(slots.concat())
        })?;
        device.write_range(output, 0, &gathered)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::ExecutionPlan;
    use crate::device::Device;
    use crate::types::PacketType;
    use std::thread;

    fn address() -> RendezvousAddress {
        "lo0:10.0.0.1:50000".parse().unwrap()
    }

    /// Run `f` on `world_size` threads, each with its own device and engine
    fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
    where
        F: Fn(usize, LoopbackDevice, Box<dyn CollectiveEngine>) -> T + Send + Clone + 'static,
        T: Send + 'static,
    {
        let hub = LoopbackHub::new();
        let handles: Vec<_> = (0..world_size)
            .map(|rank| {
                let f = f.clone();
                let hub = hub.clone();
                thread::spawn(move || {
                    let device = LoopbackDevice::new(rank);
                    let engine = LoopbackConnector::new(hub, device.clone())
                        .connect(&address(), rank, world_size)
                        .unwrap();
                    f(rank, device, engine)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_all_reduce_sums_in_element_type() {
        let plan = ExecutionPlan::new("allreduce", "plan.json");
        let results = run_ranks(3, move |rank, device, engine| {
            let dtype = DataType::Int32;
            let data = dtype.encode(&[rank as f64, 10.0 * rank as f64]);
            let send = device.alloc(data.len()).unwrap();
            let recv = device.alloc(data.len()).unwrap();
            device.write(send, &data).unwrap();
            let stream = device.create_stream().unwrap();

            engine
                .execute(&ExecuteRequest {
                    rank,
                    input: send,
                    output: recv,
                    input_bytes: data.len(),
                    output_bytes: data.len(),
                    dtype,
                    plan: &plan,
                    stream,
                    packet: PacketType::Ll16,
                })
                .unwrap();
            device.synchronize(stream).unwrap();
            dtype.decode(&device.read(recv).unwrap())
        });

        for values in results {
            assert_eq!(values, vec![3.0, 30.0]);
        }
    }

    #[test]
    fn test_all_gather_in_place_reads_own_slice() {
        let plan = ExecutionPlan::new("allgather", "plan.json");
        let results = run_ranks(2, move |rank, device, engine| {
            let dtype = DataType::Float32;
            let recv = device.alloc(4 * dtype.size()).unwrap();
            let slice = dtype.encode(&[rank as f64 + 1.0, rank as f64 + 1.5]);
            device.write_range(recv, rank * slice.len(), &slice).unwrap();
            let stream = device.create_stream().unwrap();

            engine
                .execute(&ExecuteRequest {
                    rank,
                    input: recv,
                    output: recv,
                    input_bytes: 4 * dtype.size(),
                    output_bytes: 4 * dtype.size(),
                    dtype,
                    plan: &plan,
                    stream,
                    packet: PacketType::Ll8,
                })
                .unwrap();
            dtype.decode(&device.read(recv).unwrap())
        });

        for values in results {
            assert_eq!(values, vec![1.0, 1.5, 2.0, 2.5]);
        }
    }

    #[test]
    fn test_captured_call_runs_on_replay() {
        let plan = ExecutionPlan::new("allreduce", "plan.json");
        let results = run_ranks(2, move |rank, device, engine| {
            let dtype = DataType::Float32;
            let buf = device.alloc(dtype.size()).unwrap();
            device.write(buf, &dtype.encode(&[1.0])).unwrap();
            let stream = device.create_stream().unwrap();
            let request = ExecuteRequest {
                rank,
                input: buf,
                output: buf,
                input_bytes: dtype.size(),
                output_bytes: dtype.size(),
                dtype,
                plan: &plan,
                stream,
                packet: PacketType::Ll16,
            };

            device.begin_capture(stream).unwrap();
            engine.execute(&request).unwrap();
            let graph = device.end_capture(stream).unwrap();
            let before = dtype.decode(&device.read(buf).unwrap())[0];

            // In-place all-reduce doubles the value on every replay
            device.launch_graph(graph, stream).unwrap();
            device.launch_graph(graph, stream).unwrap();
            (before, dtype.decode(&device.read(buf).unwrap())[0])
        });

        for (before, after) in results {
            assert_eq!(before, 1.0);
            assert_eq!(after, 4.0);
        }
    }

    #[test]
    fn test_rejects_mismatched_requests() {
        let hub = LoopbackHub::new();
        let device = LoopbackDevice::new(0);
        let engine = LoopbackConnector::new(hub.clone(), device.clone())
            .connect(&address(), 0, 2)
            .unwrap();
        let plan = ExecutionPlan::new("allgather", "plan.json");
        let stream = device.create_stream().unwrap();
        let a = device.alloc(8).unwrap();
        let b = device.alloc(12).unwrap();

        let request = ExecuteRequest {
            rank: 0,
            input: a,
            output: b,
            input_bytes: 8,
            output_bytes: 12,
            dtype: DataType::Float32,
            plan: &plan,
            stream,
            packet: PacketType::Ll16,
        };
        assert!(matches!(engine.execute(&request), Err(Error::Engine { .. })));
        assert!(engine.execute(&ExecuteRequest { rank: 1, ..request }).is_err());

        // Same address with a different group size
        assert!(LoopbackConnector::new(hub, device).connect(&address(), 0, 3).is_err());
    }
}
