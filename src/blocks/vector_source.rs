//! Generate samples from a fixed vector, then EOF.
use crate::block::{Block, BlockName, BlockRet};
use crate::blocks::{encode_complex, encode_real, COMPLEX, REAL};
use crate::error::Result;
use crate::port::{OutputPort, PortSpec, TypeSignature};

enum Samples {
    Real(Vec<f32>),
    Complex(Vec<(f32, f32)>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::Real(v) => v.len(),
            Samples::Complex(v) => v.len(),
        }
    }
}

/// Emits every value in `data`, `chunk` elements at a time, then
/// reports EOF. A finite, single-pass test source -- no repeat-count
/// option, since nothing in this engine needs to loop a fixed vector
/// indefinitely.
pub struct VectorSource {
    data: Samples,
    pos: usize,
    chunk: usize,
    rate: f64,
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    output: Vec<OutputPort>,
}

impl VectorSource {
    /// Emit real-valued `data`, one element per tick, at an unspecified
    /// rate.
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self::with_chunk_size(data, 1)
    }

    /// Emit real-valued `data`, `chunk` elements per tick (the last
    /// tick may be shorter).
    #[must_use]
    pub fn with_chunk_size(data: Vec<f32>, chunk: usize) -> Self {
        Self::new_samples(Samples::Real(data), chunk)
    }

    /// Emit complex-valued `(re, im)` pairs, one element per tick.
    #[must_use]
    pub fn new_complex(data: Vec<(f32, f32)>) -> Self {
        Self::new_samples(Samples::Complex(data), 1)
    }

    fn new_samples(data: Samples, chunk: usize) -> Self {
        assert!(chunk > 0, "chunk size must be positive");
        let out_type = match data {
            Samples::Real(_) => REAL,
            Samples::Complex(_) => COMPLEX,
        };
        Self {
            data,
            pos: 0,
            chunk,
            rate: 1.0,
            sigs: vec![TypeSignature::new(vec![], vec![PortSpec::new("out", out_type)])],
            chosen: None,
            output: vec![OutputPort::new("out")],
        }
    }

    /// Fix this source's declared output rate (e.g. a sample rate in Hz).
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }
}

impl BlockName for VectorSource {
    fn block_name(&self) -> &str {
        "VectorSource"
    }
}

impl Block for VectorSource {
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
        self.rate
    }

    fn run_once(&mut self) -> Result<BlockRet> {
        if self.pos >= self.data.len() {
            return Ok(BlockRet::Eof);
        }
        let end = (self.pos + self.chunk).min(self.data.len());
        let n = end - self.pos;
        match &self.data {
            Samples::Real(v) => self.output[0].write(&encode_real(&v[self.pos..end]), n)?,
            Samples::Complex(v) => self.output[0].write(&encode_complex(&v[self.pos..end]), n)?,
        }
        self.pos = end;
        Ok(BlockRet::Produced)
    }

    fn input_ports(&self) -> &[crate::port::InputPort] {
        &[]
    }

    fn input_ports_mut(&mut self) -> &mut [crate::port::InputPort] {
        &mut []
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }
}
