//! Convenient mod collecting the engine's own reference blocks.
//!
//! These exist to exercise the engine end to end (the rate/type
//! mismatch scenarios, the alias fan-out scenario, ...); they are not a
//! signal-processing library. A real application brings its own blocks
//! against the same [`crate::block::Block`] contract.
mod multiply;
mod null_sink;
mod throttle;
mod vector_sink;
mod vector_source;

pub use multiply::Multiply;
pub use null_sink::NullSink;
pub use throttle::Throttle;
pub use vector_sink::VectorSink;
pub use vector_source::VectorSource;

use crate::types::DataType;

/// The `"real"` data type these reference blocks speak: one little-endian
/// `f32` per element.
pub const REAL: DataType = DataType::new("real", 4);

/// The `"complex"` data type these reference blocks speak: two
/// little-endian `f32`s per element (real part, then imaginary part).
pub const COMPLEX: DataType = DataType::new("complex", 8);

fn encode_real(xs: &[f32]) -> Vec<u8> {
    xs.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_real(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().expect("chunks_exact(4)")))
        .collect()
}

fn encode_complex(xs: &[(f32, f32)]) -> Vec<u8> {
    xs.iter()
        .flat_map(|(re, im)| re.to_le_bytes().into_iter().chain(im.to_le_bytes()))
        .collect()
}

fn decode_complex(bytes: &[u8]) -> Vec<(f32, f32)> {
    bytes
        .chunks_exact(8)
        .map(|c| {
            let re = f32::from_le_bytes(c[0..4].try_into().expect("4 bytes"));
            let im = f32::from_le_bytes(c[4..8].try_into().expect("4 bytes"));
            (re, im)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_roundtrip() {
        let xs = vec![1.0f32, -2.5, 3.0];
        assert_eq!(decode_real(&encode_real(&xs)), xs);
    }

    #[test]
    fn complex_roundtrip() {
        let xs = vec![(1.0f32, 2.0f32), (-1.5, 0.0)];
        assert_eq!(decode_complex(&encode_complex(&xs)), xs);
    }
}
