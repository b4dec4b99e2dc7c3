//! Per-rank benchmark context
//!
//! Everything a stage needs is reached through a [`BenchContext`] built by
//! the caller. Nothing lives in module-level state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cluster::ProcessGroup;
use crate::collective::CollectiveEngine;
use crate::device::{Device, StreamHandle};
use crate::error::{Error, Result};
use crate::net::GroupIdentity;

/// Group membership, device, stream and engine of one rank
pub struct BenchContext {
    group: Box<dyn ProcessGroup>,
    device: Arc<dyn Device>,
    engine: Box<dyn CollectiveEngine>,
    identity: GroupIdentity,
    stream: Option<StreamHandle>,
}

impl BenchContext {
    /// Assemble the context and create the stream all work is issued on
    pub fn new(
        group: Box<dyn ProcessGroup>,
        device: Arc<dyn Device>,
        engine: Box<dyn CollectiveEngine>,
        identity: GroupIdentity,
    ) -> Result<Self> {
        if identity.rank != group.rank() || identity.world_size != group.world_size() {
            return Err(Error::Internal(format!(
                "identity rank {}/{} disagrees with process group {}/{}",
                identity.rank,
                identity.world_size,
                group.rank(),
                group.world_size()
            )));
        }
        let stream = device.create_stream()?;
        debug!(
            rank = identity.rank,
            device = device.ordinal(),
            engine = engine.name(),
            "Benchmark context ready"
        );
        Ok(Self {
            group,
            device,
            engine,
            identity,
            stream: Some(stream),
        })
    }

    pub fn rank(&self) -> usize {
        self.identity.rank
    }

    pub fn world_size(&self) -> usize {
        self.identity.world_size
    }

    pub fn group(&self) -> &dyn ProcessGroup {
        self.group.as_ref()
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn engine(&self) -> &dyn CollectiveEngine {
        self.engine.as_ref()
    }

    /// The stream all device work for this rank goes through
    pub fn stream(&self) -> Result<StreamHandle> {
        self.stream
            .ok_or_else(|| Error::Internal("benchmark context already torn down".into()))
    }

    /// Destroy the stream and release the group handle
    pub fn teardown(mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.device.destroy_stream(stream)?;
        }
        debug!(rank = self.identity.rank, "Benchmark context torn down");
        Ok(())
    }
}

impl Drop for BenchContext {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            warn!(rank = self.identity.rank, "Benchmark context dropped without teardown");
            let _ = self.device.destroy_stream(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalProcessGroup;
    use crate::collective::{EngineConnector, LoopbackConnector, LoopbackHub};
    use crate::device::LoopbackDevice;
    use crate::net::RendezvousAddress;

    fn single_rank(device: &LoopbackDevice, rank_in_identity: usize) -> Result<BenchContext> {
        let group = LocalProcessGroup::create(1).pop().unwrap();
        let rendezvous: RendezvousAddress = "eth0:10.0.0.5:50000".parse().unwrap();
        let engine = LoopbackConnector::new(LoopbackHub::new(), device.clone())
            .connect(&rendezvous, 0, 1)
            .unwrap();
        BenchContext::new(
            Box::new(group),
            Arc::new(device.clone()),
            engine,
            GroupIdentity {
                rank: rank_in_identity,
                world_size: 1,
                rendezvous,
            },
        )
    }

    #[test]
    fn test_teardown_destroys_stream() {
        let device = LoopbackDevice::new(0);
        let ctx = single_rank(&device, 0).unwrap();
        assert_eq!(device.live_streams(), 1);
        assert!(ctx.stream().is_ok());
        assert_eq!(ctx.world_size(), 1);

        ctx.teardown().unwrap();
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn test_drop_without_teardown_still_releases() {
        let device = LoopbackDevice::new(0);
        drop(single_rank(&device, 0).unwrap());
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn test_identity_must_match_group() {
        let device = LoopbackDevice::new(0);
        assert!(matches!(single_rank(&device, 1), Err(Error::Internal(_))));
    }
}
