/*! Composites: wiring a set of blocks into one runnable graph, with
support for nested, port-aliased sub-graphs.

A `Composite` is a flat `Vec<Box<dyn Block>>` plus a `BlockHandle(usize)`
to name entries in it, generalized so a composite can itself expose
aliased input/output ports: a sub-graph built once (a decimating filter
chain, say) can be wired into a larger graph through its own named ports
without the caller needing to know what's inside. Nesting is implemented
by eager merge ([`Composite::merge_in`]) rather than keeping child
composites alive as distinct objects: once merged, a nested composite's
blocks are ordinary children of the parent, and its alias declarations
become plain `(BlockHandle, port name)` pairs the parent can connect
like any other port. This keeps the rest of the engine (ordering, rate
resolution, pipe creation) oblivious to nesting entirely -- it only ever
sees one flat composite.
*/
use std::collections::{BTreeMap, HashMap};

use crate::analyzer::{build_deps, skip_sets, topological_order};
use crate::block::Block;
use crate::error::{Error, Result};
use crate::port::new_pipe;
use crate::types::DataType;

/// Stable reference to a block inside a [`Composite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle(pub(crate) usize);

impl BlockHandle {
    /// Sentinel handle meaning "the composite itself" rather than a
    /// block inside it. Passed to [`Composite::connect`] to declare one
    /// of the composite's own aliased ports instead of a concrete edge.
    pub const SELF: BlockHandle = BlockHandle(usize::MAX);
}

/// The input and output alias maps exposed by a composite that has just
/// been merged into a parent, translated into the parent's `BlockHandle`
/// space. Returned by [`Composite::merge_in`] so the caller can finish
/// wiring the merged composite's own ports to real blocks.
#[derive(Debug, Default)]
pub struct MergedPorts {
    /// `own input name -> every (block, port) it fans out to`.
    pub inputs: BTreeMap<String, Vec<(BlockHandle, String)>>,
    /// `own output name -> the (block, port) it delegates to`, if set.
    pub outputs: BTreeMap<String, Option<(BlockHandle, String)>>,
}

/// A named connection key: which block, which of its input ports.
type InputKey = (BlockHandle, String);
/// The source feeding an [`InputKey`]: which block, which output port.
type OutputRef = (BlockHandle, String);

/// A set of blocks wired together, optionally exposing its own aliased
/// ports so it can be merged into an enclosing composite.
pub struct Composite {
    name: String,
    blocks: Vec<Box<dyn Block>>,
    block_names: Vec<String>,
    connections: HashMap<InputKey, OutputRef>,
    own_inputs: BTreeMap<String, Vec<(BlockHandle, String)>>,
    own_outputs: BTreeMap<String, Option<(BlockHandle, String)>>,
}

impl Composite {
    /// Create an empty, named composite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            block_names: Vec::new(),
            connections: HashMap::new(),
            own_inputs: BTreeMap::new(),
            own_outputs: BTreeMap::new(),
        }
    }

    /// Name of this composite, used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a block, returning a handle for use in `connect*` calls.
    pub fn add(&mut self, block: Box<dyn Block>) -> BlockHandle {
        let handle = BlockHandle(self.blocks.len());
        self.block_names
            .push(format!("{}#{}", block.block_name(), handle.0));
        self.blocks.push(block);
        handle
    }

    fn diag_name(&self, h: BlockHandle) -> &str {
        self.block_names
            .get(h.0)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    fn has_input(&self, h: BlockHandle, port: &str) -> bool {
        self.blocks
            .get(h.0)
            .is_some_and(|b| b.input_ports().iter().any(|p| p.name() == port))
    }

    fn has_output(&self, h: BlockHandle, port: &str) -> bool {
        self.blocks
            .get(h.0)
            .is_some_and(|b| b.output_ports().iter().any(|p| p.name() == port))
    }

    fn first_output_name(&self, h: BlockHandle) -> Result<String> {
        self.blocks
            .get(h.0)
            .and_then(|b| b.output_ports().first())
            .map(|p| p.name().to_string())
            .ok_or_else(|| Error::malformed(format!("{} has no output ports", self.diag_name(h))))
    }

    fn first_input_name(&self, h: BlockHandle) -> Result<String> {
        self.blocks
            .get(h.0)
            .and_then(|b| b.input_ports().first())
            .map(|p| p.name().to_string())
            .ok_or_else(|| Error::malformed(format!("{} has no input ports", self.diag_name(h))))
    }

    /// Connect one named output to one named input.
    ///
    /// If both `src` and `dst` name real blocks, this declares a
    /// concrete edge: fails if either port doesn't exist, or if `dst`'s
    /// named input already has a connection (the double-connect
    /// rejection happens here, before any pipe is ever allocated --
    /// pipes aren't created until [`Composite::prepare_to_run`]'s last
    /// step).
    ///
    /// If one endpoint is [`BlockHandle::SELF`], the call declares one
    /// of this composite's own ports instead of an edge: `connect(SELF,
    /// name, target, port)` makes `name` a fan-out input of this
    /// composite, so that if it's later merged into a parent, wiring
    /// the parent's real source to `name` reaches `target` (and every
    /// other block declared this way); `connect(target, port, SELF,
    /// name)` makes `name` a delegating output, so the parent can wire
    /// `name` straight to a real destination. Passing `SELF` for both
    /// endpoints is rejected.
    pub fn connect(
        &mut self,
        src: BlockHandle,
        src_port: &str,
        dst: BlockHandle,
        dst_port: &str,
    ) -> Result<()> {
        match (src == BlockHandle::SELF, dst == BlockHandle::SELF) {
            (true, true) => Err(Error::malformed(
                "a composite can't alias directly to itself",
            )),
            (true, false) => self.alias_input(src_port, dst, dst_port),
            (false, true) => self.alias_output(dst_port, src, src_port),
            (false, false) => self.connect_edge(src, src_port, dst, dst_port),
        }
    }

    fn connect_edge(
        &mut self,
        src: BlockHandle,
        src_port: &str,
        dst: BlockHandle,
        dst_port: &str,
    ) -> Result<()> {
        if !self.has_output(src, src_port) {
            return Err(Error::malformed(format!(
                "{} has no output port {src_port:?}",
                self.diag_name(src)
            )));
        }
        if !self.has_input(dst, dst_port) {
            return Err(Error::malformed(format!(
                "{} has no input port {dst_port:?}",
                self.diag_name(dst)
            )));
        }
        let key = (dst, dst_port.to_string());
        if self.connections.contains_key(&key) {
            return Err(Error::malformed(format!(
                "{}'s input {dst_port:?} is already connected",
                self.diag_name(dst)
            )));
        }
        self.connections.insert(key, (src, src_port.to_string()));
        Ok(())
    }

    /// Convenience for `connect(src, <first output>, dst, <first input>)`,
    /// chained across an arbitrary number of handles: `b1 -> b2 -> b3`.
    pub fn connect_chain(&mut self, handles: &[BlockHandle]) -> Result<()> {
        for pair in handles.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let out = self.first_output_name(a)?;
            let inp = self.first_input_name(b)?;
            self.connect_edge(a, &out, b, &inp)?;
        }
        Ok(())
    }

    /// Declare `own_name` as this composite's own input, fanning out to
    /// `(target, target_port)`. Calling this more than once for the same
    /// `own_name` appends another fan-out target.
    fn alias_input(&mut self, own_name: &str, target: BlockHandle, target_port: &str) -> Result<()> {
        if !self.has_input(target, target_port) {
            return Err(Error::malformed(format!(
                "{} has no input port {target_port:?}",
                self.diag_name(target)
            )));
        }
        self.own_inputs
            .entry(own_name.to_string())
            .or_default()
            .push((target, target_port.to_string()));
        Ok(())
    }

    /// Declare `own_name` as this composite's own output, delegating to
    /// `(target, target_port)`. Fails if `own_name` is already aliased --
    /// a composite output can delegate to exactly one place.
    fn alias_output(&mut self, own_name: &str, target: BlockHandle, target_port: &str) -> Result<()> {
        if !self.has_output(target, target_port) {
            return Err(Error::malformed(format!(
                "{} has no output port {target_port:?}",
                self.diag_name(target)
            )));
        }
        let entry = self.own_outputs.entry(own_name.to_string()).or_insert(None);
        if entry.is_some() {
            return Err(Error::malformed(format!(
                "composite output {own_name:?} is already aliased"
            )));
        }
        *entry = Some((target, target_port.to_string()));
        Ok(())
    }

    /// Merge a nested composite's blocks and connections into this one,
    /// remapping its handles into this composite's space. Returns the
    /// nested composite's own port aliases, translated the same way, so
    /// the caller can finish wiring them: each aliased input's fan-out
    /// targets and each aliased output's delegate are now just ordinary
    /// `(BlockHandle, port name)` pairs in this composite, reachable
    /// through plain [`Composite::connect`] calls.
    pub fn merge_in(&mut self, other: Composite) -> MergedPorts {
        let offset = self.blocks.len();
        let remap = move |h: BlockHandle| BlockHandle(h.0 + offset);

        self.blocks.extend(other.blocks);
        self.block_names.extend(other.block_names);

        for ((dst, dst_port), (src, src_port)) in other.connections {
            self.connections
                .insert((remap(dst), dst_port), (remap(src), src_port));
        }

        let inputs = other
            .own_inputs
            .into_iter()
            .map(|(name, targets)| {
                (
                    name,
                    targets
                        .into_iter()
                        .map(|(h, p)| (remap(h), p))
                        .collect::<Vec<_>>(),
                )
            })
            .collect();
        let outputs = other
            .own_outputs
            .into_iter()
            .map(|(name, delegate)| (name, delegate.map(|(h, p)| (remap(h), p))))
            .collect();

        MergedPorts { inputs, outputs }
    }

    /// Number of blocks currently in this composite.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Validate, order, differentiate, rate-resolve and initialize every
    /// block, then create every pipe. Returns the execution order the
    /// drivers should iterate in.
    ///
    /// The graph is already flat by the time this runs -- nesting
    /// happened at `merge_in` time -- so there's no hierarchy left to
    /// walk; this just validates every input is wired, topologically
    /// orders the blocks, resolves types and rates in that order,
    /// initializes each block, and finally creates the pipes that carry
    /// data between them.
    pub fn prepare_to_run(&mut self) -> Result<Vec<BlockHandle>> {
        self.validate_inputs_connected()?;

        let deps = build_deps(self.blocks.len(), &self.connections);
        let order = topological_order(self.blocks.len(), &deps)?;

        self.resolve_types_and_rates(&order)?;

        for h in &order {
            self.blocks[h.0]
                .initialize()
                .map_err(|e| self.tag_block_runtime(*h, e))?;
        }

        self.create_pipes()?;

        Ok(order)
    }

    /// Dependency graph and skip sets for the cooperative driver. Call
    /// after [`Composite::prepare_to_run`].
    #[must_use]
    pub fn skip_sets(&self) -> std::collections::HashMap<BlockHandle, std::collections::HashSet<BlockHandle>> {
        let deps = build_deps(self.blocks.len(), &self.connections);
        skip_sets(self.blocks.len(), &deps)
    }

    fn validate_inputs_connected(&self) -> Result<()> {
        for (h, block) in self.blocks.iter().enumerate() {
            let h = BlockHandle(h);
            for port in block.input_ports() {
                let key = (h, port.name().to_string());
                if !self.connections.contains_key(&key) {
                    return Err(Error::topology(format!(
                        "{}'s input {:?} is never connected",
                        self.diag_name(h),
                        port.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_types_and_rates(&mut self, order: &[BlockHandle]) -> Result<()> {
        for &h in order {
            let input_count = self.blocks[h.0].input_ports().len();
            let mut input_types = Vec::with_capacity(input_count);
            let mut input_rates = Vec::with_capacity(input_count);

            for idx in 0..input_count {
                let port_name = self.blocks[h.0].input_ports()[idx].name().to_string();
                let (src, src_port) = self
                    .connections
                    .get(&(h, port_name.clone()))
                    .cloned()
                    .expect("validate_inputs_connected ran first");
                let src_block = &self.blocks[src.0];
                let src_out = src_block
                    .output_ports()
                    .iter()
                    .find(|p| p.name() == src_port)
                    .expect("connect() validated this port exists");
                let dt = src_out
                    .resolved_type()
                    .cloned()
                    .expect("upstream differentiated before this block, by topological order");
                let rate = src_out
                    .resolved_rate()
                    .expect("upstream rate-resolved before this block, by topological order");
                self.blocks[h.0].input_ports_mut()[idx].set_resolved_type(dt.clone());
                self.blocks[h.0].input_ports_mut()[idx].set_resolved_rate(rate);
                input_types.push(dt);
                input_rates.push(rate);
            }

            self.blocks[h.0].differentiate(&input_types)?;

            if let Some(first) = input_rates.first() {
                if input_rates.iter().any(|r| (r - first).abs() > f64::EPSILON) {
                    return Err(Error::RateMismatch {
                        block: self.diag_name(h).to_string(),
                        detail: format!("input rates disagree: {input_rates:?}"),
                    });
                }
            }

            let rate = self.blocks[h.0].rate();
            for out in self.blocks[h.0].output_ports_mut() {
                out.set_resolved_rate(rate);
            }
        }
        Ok(())
    }

    fn create_pipes(&mut self) -> Result<()> {
        let conns: Vec<(InputKey, OutputRef)> = self
            .connections
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for ((dst, dst_port), (src, src_port)) in conns {
            let src_block = &self.blocks[src.0];
            let src_out = src_block
                .output_ports()
                .iter()
                .find(|p| p.name() == src_port)
                .expect("connect() validated this port exists");
            let dt = src_out
                .resolved_type()
                .cloned()
                .expect("resolve_types_and_rates ran first");
            let rate = src_out
                .resolved_rate()
                .expect("resolve_types_and_rates ran first");

            let (writer, reader) = new_pipe(dt, rate)?;

            self.blocks[dst.0]
                .input_ports_mut()
                .iter_mut()
                .find(|p| p.name() == dst_port)
                .expect("connect() validated this port exists")
                .bind_pipe(reader)?;
            self.blocks[src.0]
                .output_ports_mut()
                .iter_mut()
                .find(|p| p.name() == src_port)
                .expect("connect() validated this port exists")
                .add_pipe(writer);
        }
        Ok(())
    }

    fn tag_block_runtime(&self, h: BlockHandle, e: Error) -> Error {
        match e {
            Error::BlockRuntime { .. } | Error::TypeMismatch { .. } | Error::RateMismatch { .. } => e,
            other => Error::BlockRuntime {
                block: self.diag_name(h).to_string(),
                detail: other.to_string(),
            },
        }
    }

    /// Access to a block by handle (used by the drivers).
    #[must_use]
    pub fn block(&self, h: BlockHandle) -> &dyn Block {
        self.blocks[h.0].as_ref()
    }

    /// Mutable access to a block by handle (used by the drivers).
    pub fn block_mut(&mut self, h: BlockHandle) -> &mut dyn Block {
        self.blocks[h.0].as_mut()
    }

    /// Diagnostic name of a block by handle.
    #[must_use]
    pub fn block_name(&self, h: BlockHandle) -> &str {
        self.diag_name(h)
    }

    /// Release every block's resources. Called once per block, after the
    /// driver observes every block has reached EOF.
    pub fn cleanup_all(&mut self) -> Result<()> {
        for b in &mut self.blocks {
            b.cleanup()?;
        }
        Ok(())
    }

    /// Close every pipe endpoint every block holds, both input and
    /// output. Used by the process driver once it's forked a child for
    /// every block: the forking process created every pipe and still
    /// holds a copy of every fd, so unless it closes its own copies it
    /// stays an extra, silent reader and writer of all of them for as
    /// long as it runs -- which would hide every real EOF from whichever
    /// downstream child is waiting for one.
    pub(crate) fn close_all_pipes(&mut self) -> Result<()> {
        for b in &mut self.blocks {
            for p in b.input_ports_mut() {
                p.close()?;
            }
            for p in b.output_ports_mut() {
                p.close()?;
            }
        }
        Ok(())
    }

    /// All currently-declared signature output/input types, for
    /// diagnostics only (not consumed by the resolver: differentiation
    /// always runs per concrete block, never per composite).
    #[must_use]
    pub fn declared_output_types(&self, h: BlockHandle) -> Vec<Option<DataType>> {
        self.blocks[h.0]
            .output_ports()
            .iter()
            .map(|p| p.resolved_type().cloned())
            .collect()
    }
}
