//! Process group abstraction
//!
//! The harness only needs three things from the launcher's process group:
//! identity (rank, world size), a barrier, and a broadcast of a small
//! numeric tensor. Everything else is built on top of those.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// ProcessGroup Trait
// ─────────────────────────────────────────────────────────────────

/// Group membership and the collective primitives used during setup
///
/// `broadcast` must deliver the same value to every rank before any rank
/// proceeds to its next group operation.
pub trait ProcessGroup: Send + Sync {
    /// This process's rank, in `0..world_size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn world_size(&self) -> usize;

    /// Block until every rank has entered the barrier
    fn barrier(&self) -> Result<()>;

    /// Overwrite `tensor` on every rank with the contents held by `src`
    fn broadcast(&self, tensor: &mut [i64], src: usize) -> Result<()>;

    /// Tear the group down after a fatal error on this rank
    ///
    /// Peers blocked in (or later entering) a group operation fail with
    /// [`Error::GroupAborted`] instead of waiting forever.
    fn abort(&self) {}
}

/// Collect one `f64` from every rank, indexed by rank
///
/// Each rank takes a turn as broadcast source, so this costs `world_size`
/// broadcasts and needs nothing beyond the [`ProcessGroup`] primitives.
pub fn gather_scalars(group: &dyn ProcessGroup, value: f64) -> Result<Vec<f64>> {
    let mut values = Vec::with_capacity(group.world_size());
    for src in 0..group.world_size() {
        let mut cell = [if src == group.rank() { value.to_bits() as i64 } else { 0 }];
        group.broadcast(&mut cell, src)?;
        values.push(f64::from_bits(cell[0] as u64));
    }
    Ok(values)
}

// ─────────────────────────────────────────────────────────────────
// LocalProcessGroup
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// Reusable barrier that can be aborted
struct AbortableBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl AbortableBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn wait(&self, rank: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(Error::GroupAborted { rank });
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return Ok(());
        }

        while state.generation == generation && !state.aborted {
            self.released.wait(&mut state);
        }
        if state.generation == generation {
            Err(Error::GroupAborted { rank })
        } else {
            Ok(())
        }
    }

    fn abort(&self) {
        self.state.lock().aborted = true;
        self.released.notify_all();
    }
}

struct SharedState {
    world_size: usize,
    barrier: AbortableBarrier,
    slot: Mutex<Vec<i64>>,
}

/// Process group whose ranks are threads of the current process
#[derive(Clone)]
pub struct LocalProcessGroup {
    rank: usize,
    shared: Arc<SharedState>,
}

impl LocalProcessGroup {
    /// Create handles for every rank of a new group; hand one to each thread
    pub fn create(world_size: usize) -> Vec<LocalProcessGroup> {
        let shared = Arc::new(SharedState {
            world_size,
            barrier: AbortableBarrier::new(world_size),
            slot: Mutex::new(Vec::new()),
        });
        (0..world_size)
            .map(|rank| LocalProcessGroup {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait(self.rank)
    }

    fn broadcast(&self, tensor: &mut [i64], src: usize) -> Result<()> {
        if src >= self.shared.world_size {
            return Err(Error::Internal(format!(
                "broadcast source {} outside group of {}",
                src, self.shared.world_size
            )));
        }

        if self.rank == src {
            *self.shared.slot.lock() = tensor.to_vec();
        }
        self.shared.barrier.wait(self.rank)?;

        let outcome = if self.rank == src {
            Ok(())
        } else {
            let slot = self.shared.slot.lock();
            if slot.len() == tensor.len() {
                tensor.copy_from_slice(&slot);
                Ok(())
            } else {
                Err(Error::Internal(format!(
                    "broadcast length mismatch: rank {} expected {}, source sent {}",
                    self.rank,
                    tensor.len(),
                    slot.len()
                )))
            }
        };

        // Nobody may overwrite the slot until every rank has read it
        self.shared.barrier.wait(self.rank)?;
        outcome
    }

    fn abort(&self) {
        self.shared.barrier.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_all<T, F>(world_size: usize, f: F) -> Vec<T>
    where
        F: Fn(LocalProcessGroup) -> T + Send + Clone + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = LocalProcessGroup::create(world_size)
            .into_iter()
            .map(|g| {
                let f = f.clone();
                thread::spawn(move || f(g))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_identity() {
        let groups = LocalProcessGroup::create(3);
        let ranks: Vec<usize> = groups.iter().map(|g| g.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(groups.iter().all(|g| g.world_size() == 3));
    }

    #[test]
    fn test_broadcast_delivers_source_value() {
        let results = spawn_all(4, |g| {
            let mut t = if g.rank() == 1 { [7, 8, 9] } else { [0, 0, 0] };
            g.broadcast(&mut t, 1).unwrap();
            t
        });
        assert!(results.iter().all(|t| *t == [7, 8, 9]));
    }

    #[test]
    fn test_consecutive_broadcasts_do_not_interfere() {
        let results = spawn_all(3, |g| {
            let mut seen = Vec::new();
            for src in 0..3 {
                let mut t = [if g.rank() == src { src as i64 * 10 } else { -1 }];
                g.broadcast(&mut t, src).unwrap();
                seen.push(t[0]);
            }
            seen
        });
        assert!(results.iter().all(|s| *s == vec![0, 10, 20]));
    }

    #[test]
    fn test_gather_scalars() {
        let results = spawn_all(3, |g| gather_scalars(&g, g.rank() as f64 + 0.5).unwrap());
        for gathered in results {
            assert_eq!(gathered, vec![0.5, 1.5, 2.5]);
        }
    }

    #[test]
    fn test_abort_releases_waiting_peers() {
        let results = spawn_all(3, |g| {
            if g.rank() == 0 {
                thread::sleep(std::time::Duration::from_millis(20));
                g.abort();
                return Ok(());
            }
            g.barrier()
        });
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::GroupAborted { rank: 1 })));
        assert!(matches!(results[2], Err(Error::GroupAborted { rank: 2 })));
    }

    #[test]
    fn test_barrier_is_reusable() {
        let results = spawn_all(4, |g| (0..50).try_for_each(|_| g.barrier()));
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_single_rank_group() {
        let g = LocalProcessGroup::create(1).pop().unwrap();
        let mut t = [42];
        g.broadcast(&mut t, 0).unwrap();
        g.barrier().unwrap();
        assert_eq!(t, [42]);
        assert!(g.broadcast(&mut t, 1).is_err());
    }
}
