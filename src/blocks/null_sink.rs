//! Discard anything written to this block.
use crate::block::{Block, BlockName, BlockRet};
use crate::blocks::REAL;
use crate::error::Result;
use crate::port::{InputPort, PortSpec, ReadStatus, TypeSignature};

/// Reads and discards until EOF. Accepts `"real"` only; a block that
/// needs to sink other types can wrap this shape with a different
/// signature list.
pub struct NullSink {
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    input: Vec<InputPort>,
}

impl NullSink {
    /// A new, unconnected null sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sigs: vec![TypeSignature::new(vec![PortSpec::new("in", REAL)], vec![])],
            chosen: None,
            input: vec![InputPort::new("in")],
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockName for NullSink {
    fn block_name(&self) -> &str {
        "NullSink"
    }
}

impl Block for NullSink {
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
        match self.input[0].read()? {
            ReadStatus::Data(_) => Ok(BlockRet::Produced),
            ReadStatus::Idle => Ok(BlockRet::Idle),
            ReadStatus::Eof => Ok(BlockRet::Eof),
        }
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.input
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn output_ports(&self) -> &[crate::port::OutputPort] {
        &[]
    }

    fn output_ports_mut(&mut self) -> &mut [crate::port::OutputPort] {
        &mut []
    }
}
