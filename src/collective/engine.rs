//! Collective engine interface
//!
//! The engine owns transport, memory registration and plan interpretation.
//! The harness only hands it device addresses and a stream.

use crate::device::{DevicePtr, StreamHandle};
use crate::error::Result;
use crate::net::RendezvousAddress;
use crate::types::{DataType, PacketType};

use super::ExecutionPlan;

/// Arguments of one collective call
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
    pub rank: usize,
    pub input: DevicePtr,
    pub output: DevicePtr,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub dtype: DataType,
    pub plan: &'a ExecutionPlan,
    pub stream: StreamHandle,
    pub packet: PacketType,
}

/// A joined communication group able to run collectives
///
/// `execute` enqueues the operation on `request.stream` and returns; the
/// caller synchronizes the stream before reading results.
pub trait CollectiveEngine: Send {
    fn execute(&self, request: &ExecuteRequest<'_>) -> Result<()>;

    /// Short backend name for logs and reports
    fn name(&self) -> &'static str;
}

/// Builds an engine once the rendezvous address is agreed
pub trait EngineConnector: Send {
    fn connect(
        &self,
        address: &RendezvousAddress,
        rank: usize,
        world_size: usize,
    ) -> Result<Box<dyn CollectiveEngine>>;
}
