//! Pass samples through unchanged, self-limiting to roughly its
//! resolved rate.
use std::time::{Duration, Instant};

use crate::block::{Block, BlockName, BlockRet};
use crate::blocks::REAL;
use crate::error::Result;
use crate::port::{InputPort, OutputPort, PortSpec, ReadStatus, TypeSignature};

/// A block with no device underneath it (e.g. a test fixture, or a
/// file replayed from disk) would otherwise run as fast as the CPU
/// allows. `Throttle` sleeps just enough, each tick, to keep its
/// long-run throughput at its resolved rate, so a graph built purely
/// out of in-memory test sources behaves like one reading off a real
/// device at a fixed sample rate.
pub struct Throttle {
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    input: Vec<InputPort>,
    output: Vec<OutputPort>,
    started: Option<Instant>,
    elems_passed: u64,
}

impl Throttle {
    /// A new, unconnected throttle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sigs: vec![TypeSignature::new(
                vec![PortSpec::new("in", REAL)],
                vec![PortSpec::new("out", REAL)],
            )],
            chosen: None,
            input: vec![InputPort::new("in")],
            output: vec![OutputPort::new("out")],
            started: None,
            elems_passed: 0,
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockName for Throttle {
    fn block_name(&self) -> &str {
        "Throttle"
    }
}

impl Block for Throttle {
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
        let bytes = match self.input[0].read()? {
            ReadStatus::Data(bytes) => bytes,
            ReadStatus::Idle => return Ok(BlockRet::Idle),
            ReadStatus::Eof => return Ok(BlockRet::Eof),
        };
        let rate = self.rate();
        let nelem = bytes.len() / REAL.element_size();

        let started = *self.started.get_or_insert_with(Instant::now);
        self.elems_passed += nelem as u64;
        if rate > 0.0 {
            let due = Duration::from_secs_f64(self.elems_passed as f64 / rate);
            let elapsed = started.elapsed();
            if let Some(remaining) = due.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }

        self.output[0].write(&bytes, nelem)?;
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
