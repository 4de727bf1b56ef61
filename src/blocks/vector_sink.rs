//! Accumulate every real-valued sample read, for test assertions.
use std::sync::{Arc, Mutex};

use crate::block::{Block, BlockName, BlockRet};
use crate::blocks::{decode_real, REAL};
use crate::error::Result;
use crate::port::{InputPort, PortSpec, ReadStatus, TypeSignature};

/// Reads until EOF, keeping everything it saw in a shared buffer. A
/// test-only counterpart to [`crate::blocks::VectorSource`].
///
/// The accumulated samples live behind an `Arc<Mutex<_>>` rather than a
/// plain field so a test can clone [`VectorSink::handle`] before the
/// sink itself is moved into a [`crate::composite::Composite`] (which
/// takes ownership as `Box<dyn Block>`).
pub struct VectorSink {
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    input: Vec<InputPort>,
    data: Arc<Mutex<Vec<f32>>>,
}

impl VectorSink {
    /// An empty sink, ready to be connected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sigs: vec![TypeSignature::new(vec![PortSpec::new("in", REAL)], vec![])],
            chosen: None,
            input: vec![InputPort::new("in")],
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A clonable handle to the samples this sink accumulates. Safe to
    /// hold onto after the sink itself has been added to a composite.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Vec<f32>>> {
        self.data.clone()
    }
}

impl Default for VectorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockName for VectorSink {
    fn block_name(&self) -> &str {
        "VectorSink"
    }
}

impl Block for VectorSink {
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
            ReadStatus::Data(bytes) => {
                self.data
                    .lock()
                    .expect("vector sink mutex poisoned")
                    .extend(decode_real(&bytes));
                Ok(BlockRet::Produced)
            }
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
