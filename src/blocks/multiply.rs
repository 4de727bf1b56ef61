//! Elementwise multiply of two streams.
use crate::block::{Block, BlockName, BlockRet};
use crate::blocks::{decode_complex, decode_real, encode_complex, encode_real, COMPLEX, REAL};
use crate::error::{Error, Result};
use crate::port::{InputPort, OutputPort, PortSpec, ReadStatus, TypeSignature};

const REAL_SIG: usize = 0;
const COMPLEX_SIG: usize = 1;

/// Multiplies its two inputs sample-wise, writing the product to its
/// single output. Declares both a `(real, real) -> real` and a
/// `(complex, complex) -> complex` signature, so the same block type
/// can be wired into a graph carrying either kind of samples --
/// differentiation picks whichever one matches what's actually
/// upstream.
pub struct Multiply {
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    input: Vec<InputPort>,
    output: Vec<OutputPort>,
}

impl Multiply {
    /// A new, unconnected multiply block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sigs: vec![
                TypeSignature::new(
                    vec![PortSpec::new("a", REAL), PortSpec::new("b", REAL)],
                    vec![PortSpec::new("out", REAL)],
                ),
                TypeSignature::new(
                    vec![PortSpec::new("a", COMPLEX), PortSpec::new("b", COMPLEX)],
                    vec![PortSpec::new("out", COMPLEX)],
                ),
            ],
            chosen: None,
            input: vec![InputPort::new("a"), InputPort::new("b")],
            output: vec![OutputPort::new("out")],
        }
    }
}

impl Default for Multiply {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockName for Multiply {
    fn block_name(&self) -> &str {
        "Multiply"
    }
}

impl Block for Multiply {
    fn type_signatures(&self) -> &[TypeSignature] {
        &self.sigs
    }

    fn differentiated_signature(&self) -> Option<usize> {
        self.chosen
    }

    fn set_differentiated_signature_index(&mut self, index: usize) {
        self.chosen = Some(index);
    }

    fn rate(&self) -> f64 {
        self.input[0].resolved_rate().unwrap_or(0.0)
    }

    fn run_once(&mut self) -> Result<BlockRet> {
        let a = self.input[0].read()?;
        let b = self.input[1].read()?;
        let (a, b) = match (a, b) {
            (ReadStatus::Data(a), ReadStatus::Data(b)) => (a, b),
            (ReadStatus::Eof, _) | (_, ReadStatus::Eof) => return Ok(BlockRet::Eof),
            _ => return Ok(BlockRet::Idle),
        };

        match self.chosen {
            Some(REAL_SIG) => {
                let a = decode_real(&a);
                let b = decode_real(&b);
                let out: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
                self.output[0].write(&encode_real(&out), out.len())?;
            }
            Some(COMPLEX_SIG) => {
                let a = decode_complex(&a);
                let b = decode_complex(&b);
                let out: Vec<(f32, f32)> = a
                    .iter()
                    .zip(&b)
                    .map(|((ar, ai), (br, bi))| (ar * br - ai * bi, ar * bi + ai * br))
                    .collect();
                self.output[0].write(&encode_complex(&out), out.len())?;
            }
            None => {
                return Err(Error::BlockRuntime {
                    block: self.block_name().to_string(),
                    detail: "run_once called before differentiation".into(),
                })
            }
            Some(other) => {
                return Err(Error::BlockRuntime {
                    block: self.block_name().to_string(),
                    detail: format!("unexpected signature index {other}"),
                })
            }
        }
        Ok(BlockRet::Produced)
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.input
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }
}
