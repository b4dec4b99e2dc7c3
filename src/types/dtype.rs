//! Element data types
//!
//! Device buffers are untyped byte regions; a [`DataType`] says how to
//! interpret them. Conversions go through `f64`, which represents every
//! supported element type exactly.

use std::fmt;
use std::str::FromStr;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Element type of a collective buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// IEEE 754 half precision
    Float16,
    /// IEEE 754 single precision
    Float32,
    /// Signed 32-bit integer
    Int32,
}

impl DataType {
    #[cfg(test)]
    pub fn all() -> &'static [DataType] {
        &[DataType::Float16, DataType::Float32, DataType::Int32]
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::Float16 => 2,
            DataType::Float32 => 4,
            DataType::Int32 => 4,
        }
    }

    /// Canonical lowercase name, as accepted on the command line
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Int32 => "int32",
        }
    }

    /// Number of whole elements that fit into `bytes`
    pub fn elements_in(&self, bytes: usize) -> usize {
        bytes / self.size()
    }

    /// Interpret little-endian bytes as elements
    pub fn decode(&self, bytes: &[u8]) -> Vec<f64> {
        match self {
            DataType::Float16 => bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f64())
                .collect(),
            DataType::Float32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            DataType::Int32 => bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
        }
    }

    /// Convert values to this type and lay them out as little-endian bytes
    ///
    /// Floats round to nearest; integers truncate toward zero and saturate.
    pub fn encode(&self, values: &[f64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * self.size());
        for &v in values {
            match self {
                DataType::Float16 => out.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
                DataType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
                DataType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            }
        }
        out
    }

    /// Elementwise `acc += other`, computed in this element type
    ///
    /// Half precision sums are formed in `f32` and rounded back, the way
    /// device reduction kernels do it. Integer sums wrap.
    pub fn accumulate(&self, acc: &mut [u8], other: &[u8]) {
        let n = acc.len().min(other.len());
        let (acc, other) = (&mut acc[..n], &other[..n]);
        match self {
            DataType::Float16 => {
                for (a, b) in acc.chunks_exact_mut(2).zip(other.chunks_exact(2)) {
                    let sum = f16::from_le_bytes([a[0], a[1]]).to_f32()
                        + f16::from_le_bytes([b[0], b[1]]).to_f32();
                    a.copy_from_slice(&f16::from_f32(sum).to_le_bytes());
                }
            }
            DataType::Float32 => {
                for (a, b) in acc.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                    let sum = f32::from_le_bytes([a[0], a[1], a[2], a[3]])
                        + f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    a.copy_from_slice(&sum.to_le_bytes());
                }
            }
            DataType::Int32 => {
                for (a, b) in acc.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                    let sum = i32::from_le_bytes([a[0], a[1], a[2], a[3]])
                        .wrapping_add(i32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                    a.copy_from_slice(&sum.to_le_bytes());
                }
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "float16" => Ok(DataType::Float16),
            "float32" => Ok(DataType::Float32),
            "int32" => Ok(DataType::Int32),
            _ => Err(Error::UnknownDataType(s.to_string())),
        }
    }
}
