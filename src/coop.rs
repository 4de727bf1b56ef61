/*! The cooperative driver: a single task, round-robin over every block.

Every block runs in the calling thread, one `run_once` per pass, in
topological order. A pass that moves no samples anywhere backs off with
a short sleep rather than spinning the CPU waiting on blocks that have
nothing to do yet. Per-block threads or processes are deliberately out
of scope here -- that isolation is what the process driver is for.
*/
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::block::BlockRet;
use crate::composite::{BlockHandle, Composite};
use crate::error::{Error, Result};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// A cheaply cloned flag that lets any owner ask a running driver to
/// stop at the next opportunity -- one `Arc<AtomicBool>` shared between,
/// say, a ctrl-C handler and the driver loop.
#[derive(Clone, Debug)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a [`Composite`] cooperatively, in the calling task.
pub struct CooperativeDriver {
    order: Vec<BlockHandle>,
    skip_sets: HashMap<BlockHandle, HashSet<BlockHandle>>,
    cancel: CancellationToken,
    done: HashSet<BlockHandle>,
}

impl CooperativeDriver {
    /// Prepare `composite` to run (validate, order, differentiate,
    /// rate-resolve, initialize, allocate pipes) and build a driver for
    /// it.
    pub fn new(composite: &mut Composite) -> Result<Self> {
        let order = composite.prepare_to_run()?;
        let skip_sets = composite.skip_sets();
        Ok(Self {
            order,
            skip_sets,
            cancel: CancellationToken::new(),
            done: HashSet::new(),
        })
    }

    /// Whether every block has reached EOF.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.len() == self.order.len()
    }

    /// A token that can cancel this driver's [`CooperativeDriver::run`]
    /// from another thread (e.g. a ctrl-C handler).
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every block to completion (or until cancelled), then call
    /// every block's `cleanup` exactly once.
    pub fn run(&mut self, composite: &mut Composite) -> Result<()> {
        let result = self.run_inner(composite);
        // Cleanup runs regardless of how the loop above ended, mirroring
        // the "called on every block exactly once at the end" guarantee.
        composite.cleanup_all()?;
        result
    }

    fn run_inner(&mut self, composite: &mut Composite) -> Result<()> {
        loop {
            if self.cancel.is_canceled() {
                debug!("cooperative driver: cancellation requested, stopping");
                return Ok(());
            }
            if self.tick(composite)? {
                return Ok(());
            }
        }
    }

    /// Run one round-robin pass over every not-yet-done block, skipping
    /// any block whose upstream reported idle this pass. Returns
    /// whether every block has now reached EOF.
    ///
    /// Exposed so callers (and tests) can observe the graph between
    /// passes; [`CooperativeDriver::run`] just loops this until done or
    /// cancelled.
    pub fn tick(&mut self, composite: &mut Composite) -> Result<bool> {
        if self.is_finished() {
            return Ok(true);
        }

        let mut produced_any = false;
        let mut skip_this_pass: HashSet<BlockHandle> = HashSet::new();

        for &h in &self.order {
            if self.done.contains(&h) || skip_this_pass.contains(&h) {
                continue;
            }
            let name = composite.block_name(h).to_string();
            match composite.block_mut(h).run_once() {
                Ok(BlockRet::Produced) => produced_any = true,
                Ok(BlockRet::Idle) => {
                    trace!("{name}: idle this pass, skipping its downstream");
                    if let Some(targets) = self.skip_sets.get(&h) {
                        skip_this_pass.extend(targets.iter().copied());
                    }
                }
                Ok(BlockRet::Eof) => {
                    debug!("{name}: reached EOF");
                    produced_any = true; // EOF is forward progress too.
                    self.done.insert(h);
                    composite
                        .block_mut(h)
                        .output_ports_mut()
                        .iter_mut()
                        .try_for_each(|p| p.close())?;
                }
                Err(e) => {
                    return Err(match e {
                        Error::BlockRuntime { .. } => e,
                        other => Error::BlockRuntime {
                            block: name,
                            detail: other.to_string(),
                        },
                    });
                }
            }
        }

        if !produced_any {
            std::thread::sleep(IDLE_SLEEP);
        }
        Ok(self.is_finished())
    }
}
