//! Shared helpers for the integration test suite.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustradio::block::{Block, BlockName, BlockRet};
use rustradio::error::Result;
use rustradio::port::{InputPort, OutputPort, ReadStatus, TypeSignature};

/// Wraps a block, counting how many times `cleanup` is called on it.
/// Used to verify "cleanup called on every block exactly once" without
/// adding bookkeeping to the reference blocks themselves.
pub struct Tracked<B> {
    pub inner: B,
    pub cleanups: Arc<AtomicUsize>,
}

impl<B> Tracked<B> {
    pub fn new(inner: B) -> (Self, Arc<AtomicUsize>) {
        let cleanups = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                cleanups: cleanups.clone(),
            },
            cleanups,
        )
    }
}

impl<B: BlockName> BlockName for Tracked<B> {
    fn block_name(&self) -> &str {
        self.inner.block_name()
    }
}

impl<B: Block> Block for Tracked<B> {
    fn type_signatures(&self) -> &[TypeSignature] {
        self.inner.type_signatures()
    }
    fn differentiated_signature(&self) -> Option<usize> {
        self.inner.differentiated_signature()
    }
    fn set_differentiated_signature_index(&mut self, index: usize) {
        self.inner.set_differentiated_signature_index(index);
    }
    fn rate(&self) -> f64 {
        self.inner.rate()
    }
    fn initialize(&mut self) -> Result<()> {
        self.inner.initialize()
    }
    fn run_once(&mut self) -> Result<BlockRet> {
        self.inner.run_once()
    }
    fn cleanup(&mut self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.inner.cleanup()
    }
    fn input_ports(&self) -> &[InputPort] {
        self.inner.input_ports()
    }
    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        self.inner.input_ports_mut()
    }
    fn output_ports(&self) -> &[OutputPort] {
        self.inner.output_ports()
    }
    fn output_ports_mut(&mut self) -> &mut [OutputPort] {
        self.inner.output_ports_mut()
    }
}

/// A block that reports idle a fixed number of times before passing
/// every subsequent input straight through. Used to drive the
/// skip-propagation scenario (S5): it tests that the driver skips a
/// downstream block while this one is idle, not whether a pipe read can
/// itself return idle without blocking (that's covered directly against
/// a real pipe in `port`'s own tests). The fixed countdown is what makes
/// S5's tick counts deterministic regardless of how fast the upstream
/// source actually produces.
pub struct IdleThenPassthrough {
    pub sigs: Vec<TypeSignature>,
    pub chosen: Option<usize>,
    pub input: Vec<InputPort>,
    pub output: Vec<OutputPort>,
    pub idle_remaining: usize,
    pub ticks: Arc<AtomicUsize>,
}

impl BlockName for IdleThenPassthrough {
    fn block_name(&self) -> &str {
        "IdleThenPassthrough"
    }
}

impl Block for IdleThenPassthrough {
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
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if self.idle_remaining > 0 {
            self.idle_remaining -= 1;
            // Deliberately don't read: we're testing that downstream
            // gets skipped while this block has nothing to offer it,
            // not modelling backpressure.
            return Ok(BlockRet::Idle);
        }
        match self.input[0].read()? {
            ReadStatus::Data(bytes) => {
                let nelem = bytes.len() / 4;
                self.output[0].write(&bytes, nelem)?;
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
    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }
    fn output_ports_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }
}

/// A block that records every tick it's invoked on, for asserting a
/// downstream block was (or wasn't) polled on a given pass.
pub struct TickCounter {
    pub sigs: Vec<TypeSignature>,
    pub chosen: Option<usize>,
    pub input: Vec<InputPort>,
    pub ticks: Arc<AtomicUsize>,
}

impl BlockName for TickCounter {
    fn block_name(&self) -> &str {
        "TickCounter"
    }
}

impl Block for TickCounter {
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
        self.ticks.fetch_add(1, Ordering::SeqCst);
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
    fn output_ports(&self) -> &[OutputPort] {
        &[]
    }
    fn output_ports_mut(&mut self) -> &mut [OutputPort] {
        &mut []
    }
}
