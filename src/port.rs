/*! Ports and pipes: the typed endpoints blocks are wired through.

A pipe is created in writer/reader halves, backed by a real OS pipe so
the same type serves the cooperative driver (which calls `read`/`write`
directly, in-process, once per tick) and the process driver (which
relies on the fds surviving a `fork`) without any change in shape. The
read end is opened non-blocking: a block polled by the cooperative
driver needs to tell "nothing to read yet" apart from "blocked forever",
so it can report [`crate::block::BlockRet::Idle`] and let the driver
move on instead of stalling the whole pass on one empty pipe.
*/
use std::os::fd::RawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::{Error, Result};
use crate::types::DataType;

/// One input or output slot declared by a [`crate::block::Block`]'s type
/// signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Port name, unique among a block's inputs (or among its outputs).
    pub name: String,
    /// The data type this port carries under this signature.
    pub data_type: DataType,
}

impl PortSpec {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One allowed assignment of input and output port types for a block.
///
/// Differentiation ([`crate::block::Block::differentiate`]) picks the
/// unique signature whose `inputs` types match the upstream output types
/// pointwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeSignature {
    /// Ordered input ports this signature expects.
    pub inputs: Vec<PortSpec>,
    /// Ordered output ports this signature produces.
    pub outputs: Vec<PortSpec>,
}

impl TypeSignature {
    /// Build a signature from input and output port specs.
    pub fn new(inputs: Vec<PortSpec>, outputs: Vec<PortSpec>) -> Self {
        Self { inputs, outputs }
    }

    fn input_types_match(&self, types: &[DataType]) -> bool {
        self.inputs.len() == types.len()
            && self
                .inputs
                .iter()
                .zip(types)
                .all(|(spec, t)| &spec.data_type == t)
    }
}

/// Pick the signature whose inputs match `types` pointwise, or fail.
pub fn differentiate<'a>(
    signatures: &'a [TypeSignature],
    block_name: &str,
    types: &[DataType],
) -> Result<&'a TypeSignature> {
    let mut matches = signatures.iter().filter(|s| s.input_types_match(types));
    let found = matches.next().ok_or_else(|| Error::TypeMismatch {
        block: block_name.to_string(),
        detail: format!(
            "no declared signature accepts inputs {:?}; have {} signature(s)",
            types.iter().map(DataType::name).collect::<Vec<_>>(),
            signatures.len()
        ),
    })?;
    Ok(found)
}

const FRAME_HEADER_BYTES: usize = 4;

/// Outcome of attempting to read the next frame from an input.
#[derive(Debug)]
pub enum ReadStatus {
    /// A full framed vector, ready to use.
    Data(Vec<u8>),
    /// No full frame is available yet; the writer hasn't produced
    /// enough for one. Distinct from [`ReadStatus::Eof`] -- the pipe is
    /// still open, just empty right now.
    Idle,
    /// The writer closed at a frame boundary; no more data is coming.
    Eof,
}

/// Write half of a [`Pipe`].
///
/// Owned by the source [`OutputPort`]; one `PipeWriter` per fanned-out
/// destination.
#[derive(Debug)]
pub struct PipeWriter {
    fd: RawFd,
    data_type: DataType,
    rate: f64,
}

/// Read half of a [`Pipe`].
///
/// Owned by the destination [`InputPort`]. A pipe is one-writer/one-reader:
/// exactly one `PipeReader` exists per [`PipeWriter`]. The read end is
/// opened non-blocking, so a partially-read frame (the header arrived but
/// not yet the body, say) has to survive across calls -- `state` holds
/// whatever's been collected so far.
#[derive(Debug)]
pub struct PipeReader {
    fd: RawFd,
    data_type: DataType,
    rate: f64,
    state: FrameState,
}

#[derive(Debug)]
enum FrameState {
    Header(Vec<u8>),
    Body { nelem: usize, buf: Vec<u8> },
}

impl Default for FrameState {
    fn default() -> Self {
        FrameState::Header(Vec::with_capacity(FRAME_HEADER_BYTES))
    }
}

/// Create one writer/reader pair backed by a fresh OS pipe.
///
/// `data_type`/`rate` are the resolved metadata of the source port; both
/// halves carry a copy so `get_data_type`/`get_rate` never need to
/// dereference back to the owning port.
pub fn new_pipe(data_type: DataType, rate: f64) -> Result<(PipeWriter, PipeReader)> {
    let (read_fd, write_fd) = nix::unistd::pipe()?;
    use std::os::fd::IntoRawFd;
    let read_fd = read_fd.into_raw_fd();
    set_nonblocking(read_fd)?;
    Ok((
        PipeWriter {
            fd: write_fd.into_raw_fd(),
            data_type: data_type.clone(),
            rate,
        },
        PipeReader {
            fd: read_fd,
            data_type,
            rate,
            state: FrameState::default(),
        },
    ))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` was just created by `nix::unistd::pipe()` above and is
    // owned by this function for the duration of the call.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let current = fcntl(&borrowed, FcntlArg::F_GETFL).map_err(|e| Error::Transport(e.to_string()))?;
    let flags = OFlag::from_bits_truncate(current) | OFlag::O_NONBLOCK;
    fcntl(&borrowed, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Transport(e.to_string()))?;
    Ok(())
}

impl PipeWriter {
    /// Resolved data type of the source port this pipe carries.
    #[must_use]
    pub fn get_data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Resolved rate of the source port this pipe carries.
    #[must_use]
    pub fn get_rate(&self) -> f64 {
        self.rate
    }

    /// Raw descriptors this endpoint needs preserved across a fork.
    #[must_use]
    pub fn filenos(&self) -> Vec<RawFd> {
        vec![self.fd]
    }

    /// Write one framed vector of `nelem` homogeneous samples.
    ///
    /// `bytes` must be exactly `nelem * data_type.element_size()` long.
    /// Blocks until the reader has drained enough of the pipe's kernel
    /// buffer to accept the whole frame.
    pub fn write(&self, bytes: &[u8], nelem: usize) -> Result<()> {
        debug_assert_eq!(bytes.len(), nelem * self.data_type.element_size());
        let header = (nelem as u32).to_le_bytes();
        write_all(self.fd, &header)?;
        write_all(self.fd, bytes)?;
        Ok(())
    }

    /// Close this endpoint's descriptor.
    pub fn close(self) -> Result<()> {
        nix::unistd::close(self.fd)?;
        Ok(())
    }
}

impl PipeReader {
    /// Resolved data type of the source port this pipe carries.
    #[must_use]
    pub fn get_data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Resolved rate of the source port this pipe carries.
    #[must_use]
    pub fn get_rate(&self) -> f64 {
        self.rate
    }

    /// Raw descriptors this endpoint needs preserved across a fork.
    #[must_use]
    pub fn filenos(&self) -> Vec<RawFd> {
        vec![self.fd]
    }

    /// Read the next framed vector.
    ///
    /// Returns [`ReadStatus::Idle`] without blocking if the writer hasn't
    /// produced a full frame yet -- a block's `run_once` should read this
    /// as "nothing to do this tick", not as an error. Returns
    /// [`ReadStatus::Eof`] on a clean close (writer closed at a frame
    /// boundary, no bytes pending); a close mid-frame is a transport
    /// failure, not EOF.
    pub fn read(&mut self) -> Result<ReadStatus> {
        loop {
            match &mut self.state {
                FrameState::Header(buf) => match try_fill(self.fd, buf, FRAME_HEADER_BYTES)? {
                    FillOutcome::WouldBlock => return Ok(ReadStatus::Idle),
                    FillOutcome::Eof if buf.is_empty() => return Ok(ReadStatus::Eof),
                    FillOutcome::Eof => {
                        return Err(Error::Transport(
                            "pipe closed mid-frame: header announced a vector the writer never finished".into(),
                        ))
                    }
                    FillOutcome::Filled => {
                        let nelem = u32::from_le_bytes(
                            buf[..FRAME_HEADER_BYTES].try_into().expect("exactly 4 bytes"),
                        ) as usize;
                        self.state = FrameState::Body {
                            nelem,
                            buf: Vec::with_capacity(nelem * self.data_type.element_size()),
                        };
                    }
                },
                FrameState::Body { nelem, buf } => {
                    let needed = *nelem * self.data_type.element_size();
                    match try_fill(self.fd, buf, needed)? {
                        FillOutcome::WouldBlock => return Ok(ReadStatus::Idle),
                        FillOutcome::Eof => {
                            return Err(Error::Transport(
                                "pipe closed mid-frame: header announced a vector the writer never finished".into(),
                            ))
                        }
                        FillOutcome::Filled => {
                            let data = std::mem::take(buf);
                            self.state = FrameState::default();
                            return Ok(ReadStatus::Data(data));
                        }
                    }
                }
            }
        }
    }

    /// Close this endpoint's descriptor.
    pub fn close(self) -> Result<()> {
        nix::unistd::close(self.fd)?;
        Ok(())
    }
}

enum FillOutcome {
    Filled,
    WouldBlock,
    Eof,
}

/// Grow `buf` (non-blocking reads, appended) up to `target_len` bytes.
/// Returns as soon as the pipe would block, reports clean EOF only if
/// zero bytes have been collected so far, and otherwise keeps `buf`
/// around so the next call can resume where this one left off.
fn try_fill(fd: RawFd, buf: &mut Vec<u8>, target_len: usize) -> Result<FillOutcome> {
    // SAFETY: `fd` is a pipe descriptor owned by the caller's port for the
    // duration of this call; we never close it through this borrow.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    while buf.len() < target_len {
        let mut chunk = vec![0u8; target_len - buf.len()];
        match nix::unistd::read(&borrowed, &mut chunk) {
            Ok(0) => return Ok(FillOutcome::Eof),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(nix::errno::Errno::EINTR) => continue,
            // EWOULDBLOCK and EAGAIN are the same errno on every target
            // this engine runs on.
            Err(nix::errno::Errno::EAGAIN) => return Ok(FillOutcome::WouldBlock),
            Err(e) => return Err(Error::Transport(e.to_string())),
        }
    }
    Ok(FillOutcome::Filled)
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        // SAFETY: `fd` is a pipe descriptor owned by the caller's port for
        // the duration of this call; we never close it through this borrow.
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let n = loop {
            match nix::unistd::write(&borrowed, buf) {
                Ok(n) => break n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        };
        buf = &buf[n..];
    }
    Ok(())
}

/// A block's concrete input slot.
///
/// Holds at most one bound pipe (spec: "Input port = (owner block, name,
/// single incoming pipe)").
#[derive(Debug)]
pub struct InputPort {
    name: String,
    resolved_type: Option<DataType>,
    resolved_rate: Option<f64>,
    pipe: Option<PipeReader>,
}

impl InputPort {
    /// Create an unconnected input port with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved_type: None,
            resolved_rate: None,
            pipe: None,
        }
    }

    /// Port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a pipe has been bound to this input.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.pipe.is_some()
    }

    /// Resolved data type, set during differentiation.
    #[must_use]
    pub fn resolved_type(&self) -> Option<&DataType> {
        self.resolved_type.as_ref()
    }

    /// Resolved rate, set during rate propagation.
    #[must_use]
    pub fn resolved_rate(&self) -> Option<f64> {
        self.resolved_rate
    }

    /// Bind a pipe to this input. Fails if one is already bound -- an
    /// input port can only ever be fed by one pipe.
    pub fn bind_pipe(&mut self, pipe: PipeReader) -> Result<()> {
        if self.pipe.is_some() {
            return Err(Error::malformed(format!(
                "input port {:?} is already connected",
                self.name
            )));
        }
        self.pipe = Some(pipe);
        Ok(())
    }

    pub(crate) fn set_resolved_type(&mut self, dt: DataType) {
        self.resolved_type = Some(dt);
    }

    pub(crate) fn set_resolved_rate(&mut self, rate: f64) {
        self.resolved_rate = Some(rate);
    }

    /// Read the next framed vector from this input.
    pub fn read(&mut self) -> Result<ReadStatus> {
        match &mut self.pipe {
            Some(p) => p.read(),
            None => Err(Error::Transport(format!(
                "read from unconnected input port {:?}",
                self.name
            ))),
        }
    }

    /// Raw descriptors this port needs preserved across a fork.
    #[must_use]
    pub fn filenos(&self) -> Vec<RawFd> {
        self.pipe.as_ref().map(PipeReader::filenos).unwrap_or_default()
    }

    /// Close the bound pipe, if any.
    pub fn close(&mut self) -> Result<()> {
        if let Some(p) = self.pipe.take() {
            p.close()?;
        }
        Ok(())
    }
}

/// A block's concrete output slot.
///
/// Holds a fan-out list of pipes (spec: "source port owns a list of pipes
/// for fan-out; the framework duplicates produced vectors across them").
#[derive(Debug)]
pub struct OutputPort {
    name: String,
    resolved_type: Option<DataType>,
    resolved_rate: Option<f64>,
    pipes: Vec<PipeWriter>,
}

impl OutputPort {
    /// Create an unconnected output port with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved_type: None,
            resolved_rate: None,
            pipes: Vec::new(),
        }
    }

    /// Port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of destinations this output fans out to.
    #[must_use]
    pub fn fanout(&self) -> usize {
        self.pipes.len()
    }

    /// Resolved data type, set during differentiation.
    #[must_use]
    pub fn resolved_type(&self) -> Option<&DataType> {
        self.resolved_type.as_ref()
    }

    /// Resolved rate, set during rate propagation.
    #[must_use]
    pub fn resolved_rate(&self) -> Option<f64> {
        self.resolved_rate
    }

    pub(crate) fn set_resolved_type(&mut self, dt: DataType) {
        self.resolved_type = Some(dt);
    }

    pub(crate) fn set_resolved_rate(&mut self, rate: f64) {
        self.resolved_rate = Some(rate);
    }

    /// Append another fan-out destination.
    pub(crate) fn add_pipe(&mut self, pipe: PipeWriter) {
        self.pipes.push(pipe);
    }

    /// Write one framed vector, duplicating it across every fanned-out
    /// destination. The slowest reader determines how long this blocks.
    pub fn write(&self, bytes: &[u8], nelem: usize) -> Result<()> {
        for p in &self.pipes {
            p.write(bytes, nelem)?;
        }
        Ok(())
    }

    /// Raw descriptors this port needs preserved across a fork.
    #[must_use]
    pub fn filenos(&self) -> Vec<RawFd> {
        self.pipes.iter().flat_map(PipeWriter::filenos).collect()
    }

    /// Close every fan-out pipe this port owns.
    pub fn close(&mut self) -> Result<()> {
        for p in self.pipes.drain(..) {
            p.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_roundtrip() -> Result<()> {
        let (w, mut r) = new_pipe(DataType::new("real", 4), 1000.0)?;
        w.write(&[1, 2, 3, 4, 5, 6, 7, 8], 2)?;
        match r.read()? {
            ReadStatus::Data(got) => assert_eq!(got, vec![1, 2, 3, 4, 5, 6, 7, 8]),
            other => panic!("expected data, got {other:?}"),
        }
        w.close()?;
        assert!(
            matches!(r.read()?, ReadStatus::Eof),
            "expected EOF after writer closed"
        );
        Ok(())
    }

    #[test]
    fn read_on_empty_pipe_is_idle_not_blocking() -> Result<()> {
        let (w, mut r) = new_pipe(DataType::new("real", 4), 1000.0)?;
        assert!(matches!(r.read()?, ReadStatus::Idle));
        w.close()?;
        assert!(matches!(r.read()?, ReadStatus::Eof));
        Ok(())
    }

    #[test]
    fn differentiate_picks_matching_signature() {
        let sigs = vec![
            TypeSignature::new(
                vec![PortSpec::new("a", DataType::new("real", 4))],
                vec![PortSpec::new("out", DataType::new("real", 4))],
            ),
            TypeSignature::new(
                vec![PortSpec::new("a", DataType::new("complex", 8))],
                vec![PortSpec::new("out", DataType::new("complex", 8))],
            ),
        ];
        let chosen = differentiate(&sigs, "Block", &[DataType::new("complex", 8)]).unwrap();
        assert_eq!(chosen.outputs[0].data_type, DataType::new("complex", 8));
    }

    #[test]
    fn differentiate_fails_with_no_match() {
        let sigs = vec![TypeSignature::new(
            vec![PortSpec::new("a", DataType::new("real", 4))],
            vec![],
        )];
        let err = differentiate(&sigs, "Block", &[DataType::new("complex", 8)]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn double_bind_is_rejected() -> Result<()> {
        let (w1, r1) = new_pipe(DataType::new("real", 4), 1000.0)?;
        let (_w2, r2) = new_pipe(DataType::new("real", 4), 1000.0)?;
        let mut input = InputPort::new("in");
        input.bind_pipe(r1)?;
        let err = input.bind_pipe(r2).unwrap_err();
        assert!(matches!(err, Error::MalformedConnection(_)));
        w1.close()?;
        input.close()?;
        Ok(())
    }
}
