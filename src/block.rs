/*! The block contract: what the engine consumes.

Every processing unit in a flow graph implements [`Block`]. The engine
never reflects on concrete block types -- differentiation, rate
resolution, and both drivers go through this trait alone, via dynamic
dispatch on `Box<dyn Block>`. `run_once` returns an explicit `Eof`
variant rather than leaving the caller to infer termination from
repeated no-op ticks, since both drivers need to trigger an EOF cascade
the moment a block is exhausted, not some number of ticks later.
*/
use std::os::fd::RawFd;

use crate::error::Result;
use crate::port::{differentiate, InputPort, OutputPort, TypeSignature};
use crate::types::DataType;

/// Outcome of one cooperative tick ([`Block::run_once`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRet {
    /// At least one sample was produced (or consumed, for a pure sink) on
    /// every output pipe.
    Produced,

    /// No samples were produced this tick, because not enough input was
    /// available. The cooperative driver may skip everything downstream
    /// of this block for the rest of the pass.
    Idle,

    /// This block will never produce more output; upstream is exhausted.
    /// Triggers EOF cascade.
    Eof,
}

/// Name of a block, for diagnostics and error messages.
///
/// Split out from [`Block`] so name lookups (used constantly by the
/// composite and analyzer for error messages) don't require `&mut`.
pub trait BlockName {
    /// Name of this block. Not the name of a specific instance, though
    /// implementations are free to include instance-specific detail.
    fn block_name(&self) -> &str;
}

/// The capability set the flow-graph engine requires of every block.
///
/// Lifecycle: constructed (by user code) -> [`Block::differentiate`]
/// (exactly once, at graph start) -> [`Block::initialize`] (once) ->
/// [`Block::run_once`] (repeatedly, cooperative mode) or [`Block::run`]
/// (once, in a forked child, process mode) -> [`Block::cleanup`] (once).
pub trait Block: BlockName + Send {
    /// Type signatures this block offers to the resolver.
    fn type_signatures(&self) -> &[TypeSignature];

    /// Index of the signature chosen by [`Block::differentiate`], once
    /// that has run.
    fn differentiated_signature(&self) -> Option<usize>;

    /// Pick the unique declared signature whose input types equal
    /// `input_types`, pointwise; store it, and set every output port's
    /// resolved type accordingly.
    ///
    /// The default implementation covers the common case: it delegates
    /// to [`crate::port::differentiate`] and writes the chosen
    /// signature's output types onto `self.output_ports_mut()` in order.
    /// Blocks whose signature list is empty (malformed) or whose port
    /// count doesn't match their own arrays should override this to
    /// produce a clearer error, but most blocks never need to.
    fn differentiate(&mut self, input_types: &[DataType]) -> Result<()> {
        let name = self.block_name().to_string();
        let sig = differentiate(self.type_signatures(), &name, input_types)?.clone();
        for (port, spec) in self.output_ports_mut().iter_mut().zip(&sig.outputs) {
            port.set_resolved_type(spec.data_type.clone());
        }
        self.set_differentiated_signature_index(
            self.type_signatures()
                .iter()
                .position(|s| *s == sig)
                .expect("signature came from type_signatures()"),
        );
        Ok(())
    }

    /// Record which signature [`Block::differentiate`] picked. Called by
    /// the default `differentiate` implementation; blocks overriding
    /// `differentiate` must call this themselves if they want
    /// [`Block::differentiated_signature`] to work.
    fn set_differentiated_signature_index(&mut self, index: usize);

    /// This block's output sample rate, derived from its (already
    /// rate-resolved) input ports. Sources -- blocks with no input ports
    /// -- return an intrinsic rate instead.
    fn rate(&self) -> f64;

    /// One-shot setup after differentiation: allocate filter state, open
    /// devices, etc. Default is a no-op.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// One cooperative tick.
    fn run_once(&mut self) -> Result<BlockRet>;

    /// Process-mode driver entry: loop `run_once` until EOF. Used in the
    /// child of each fork. Default just loops; blocks rarely need to
    /// override this.
    fn run(&mut self) -> Result<()> {
        loop {
            if let BlockRet::Eof = self.run_once()? {
                return Ok(());
            }
        }
    }

    /// Release resources. Default is a no-op.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Auxiliary open files this block needs preserved across a process
    /// fork (e.g. an input file a file source opened before `start`).
    /// Default is none.
    fn files(&self) -> &[RawFd] {
        &[]
    }

    /// This block's concrete input ports, in declared order.
    fn input_ports(&self) -> &[InputPort];
    /// Mutable access to this block's input ports.
    fn input_ports_mut(&mut self) -> &mut [InputPort];
    /// This block's concrete output ports, in declared order.
    fn output_ports(&self) -> &[OutputPort];
    /// Mutable access to this block's output ports.
    fn output_ports_mut(&mut self) -> &mut [OutputPort];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortSpec;

    struct Noop {
        sigs: Vec<TypeSignature>,
        chosen: Option<usize>,
        input: Vec<InputPort>,
        output: Vec<OutputPort>,
    }

    impl BlockName for Noop {
        fn block_name(&self) -> &str {
            "Noop"
        }
    }
    impl Block for Noop {
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
            self.input_ports()[0].resolved_rate().unwrap_or(0.0)
        }
        fn run_once(&mut self) -> Result<BlockRet> {
            Ok(BlockRet::Idle)
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

    #[test]
    fn default_differentiate_sets_output_types_and_index() {
        let real = DataType::new("real", 4);
        let complex = DataType::new("complex", 8);
        let mut b = Noop {
            sigs: vec![
                TypeSignature::new(
                    vec![PortSpec::new("in", real.clone())],
                    vec![PortSpec::new("out", real.clone())],
                ),
                TypeSignature::new(
                    vec![PortSpec::new("in", complex.clone())],
                    vec![PortSpec::new("out", complex.clone())],
                ),
            ],
            chosen: None,
            input: vec![InputPort::new("in")],
            output: vec![OutputPort::new("out")],
        };
        b.differentiate(&[complex.clone()]).unwrap();
        assert_eq!(b.differentiated_signature(), Some(1));
        assert_eq!(b.output_ports()[0].resolved_type(), Some(&complex));
    }
}
