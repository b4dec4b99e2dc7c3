//! Deterministic case data and result comparison
//!
//! Every rank draws the same global buffer from a shared seed and keeps its
//! own slice, so each rank can compute the expected collective result
//! without communicating.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::collective::CollectiveKind;
use crate::types::DataType;

/// Relative tolerance applied on top of the per-rank absolute tolerance
pub const RELATIVE_TOLERANCE: f64 = 1e-5;

/// Exclusive upper bound of generated int32 values
const INT_RANGE: i32 = 256;

// ─────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────

/// Draw `count` values representable in `dtype`
///
/// Floats are uniform in [0, 1) and rounded to the element type; integers
/// are uniform in [0, 256).
pub fn generate_values(dtype: DataType, count: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    match dtype {
        DataType::Int32 => (0..count)
            .map(|_| rng.gen_range(0..INT_RANGE) as f64)
            .collect(),
        DataType::Float16 | DataType::Float32 => {
            let raw: Vec<f64> = (0..count).map(|_| rng.gen::<f64>()).collect();
            dtype.decode(&dtype.encode(&raw))
        }
    }
}

/// Host-side contents of one case's buffers plus the expected result
#[derive(Debug, Clone)]
pub struct CaseData {
    /// Initial send buffer bytes (this rank's slice)
    pub send: Vec<u8>,

    /// Initial receive buffer bytes
    pub recv: Vec<u8>,

    /// Values the result buffer must hold after the call
    pub expected: Vec<f64>,
}

/// Build the inputs and expected output of one rank
///
/// `count` is the per-rank element count. All-gather receive buffers hold
/// `count * world_size` elements and, for in-place calls, start with this
/// rank's slice at its offset. Reduction receive buffers start zeroed.
pub fn prepare_case_data(
    kind: CollectiveKind,
    dtype: DataType,
    in_place: bool,
    count: usize,
    rank: usize,
    world_size: usize,
    seed: u64,
) -> CaseData {
    let global = generate_values(dtype, count * world_size, seed);
    let slices: Vec<&[f64]> = global.chunks(count.max(1)).collect();
    let own = dtype.encode(slices.get(rank).copied().unwrap_or(&[]));

    match kind {
        CollectiveKind::AllGather => {
            let mut recv = vec![0u8; count * world_size * dtype.size()];
            if in_place {
                let offset = rank * own.len();
                recv[offset..offset + own.len()].copy_from_slice(&own);
            }
            CaseData {
                send: own,
                recv,
                expected: global,
            }
        }
        CollectiveKind::AllReduce => {
            let mut sum = vec![0u8; count * dtype.size()];
            for slice in &slices {
                dtype.accumulate(&mut sum, &dtype.encode(slice));
            }
            CaseData {
                recv: vec![0u8; own.len()],
                send: own,
                expected: dtype.decode(&sum),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Comparison
// ─────────────────────────────────────────────────────────────────

/// First element outside tolerance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
}

/// Outcome of an elementwise approximate comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub total: usize,
    pub mismatches: usize,
    pub first: Option<Mismatch>,
}

impl Comparison {
    #[cfg(test)]
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compare elementwise: `|actual - expected| <= atol + rtol * |expected|`
///
/// A length difference counts every missing or extra element as a mismatch.
pub fn allclose(actual: &[f64], expected: &[f64], atol: f64, rtol: f64) -> Comparison {
    let mut mismatches = actual.len().abs_diff(expected.len());
    let mut first = None;

    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let close = (a - e).abs() <= atol + rtol * e.abs();
        if !close {
            mismatches += 1;
            first.get_or_insert(Mismatch {
                index,
                expected: e,
                actual: a,
            });
        }
    }

    if first.is_none() && mismatches > 0 {
        let index = actual.len().min(expected.len());
        first = Some(Mismatch {
            index,
            expected: expected.get(index).copied().unwrap_or(f64::NAN),
            actual: actual.get(index).copied().unwrap_or(f64::NAN),
        });
    }

    Comparison {
        total: expected.len(),
        mismatches,
        first,
    }
}
