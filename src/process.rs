/*! The process driver: one forked OS process per block, wired by the
same pipes the cooperative driver uses directly.

Each block runs to completion in its own process, spawned with
`fork()` rather than a thread so a block that corrupts its own memory
or crashes outright can't take the rest of the graph down with it.
Completion is detected with `waitpid`/`SIGCHLD` rather than a channel,
since the children are separate processes with no shared memory to
signal through. The controller masks `SIGCHLD`/`SIGINT`/`SIGTERM` with
`nix::sys::signal::sigprocmask` *before* forking anything, so a child
that exits immediately can never have its `SIGCHLD` delivered (and
discarded) before the controller starts waiting for it.
*/
use std::os::fd::RawFd;

use log::{debug, error, info};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::composite::{BlockHandle, Composite};
use crate::error::{Error, Result};

/// How one forked block's process last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Forked, not yet reaped.
    Running,
    /// Exited cleanly with the given code.
    Exited(i32),
    /// Killed by the given signal.
    Signaled(i32),
}

struct Child {
    handle: BlockHandle,
    pid: Pid,
    status: BlockStatus,
}

/// Runs a [`Composite`] as one forked process per block.
///
/// Lifecycle: [`ProcessDriver::start`] forks every child, then
/// [`ProcessDriver::wait`] blocks the calling task until all of them
/// exit (or [`ProcessDriver::stop`] asks them to terminate early).
/// [`ProcessDriver::status`] reports the current view at any point.
pub struct ProcessDriver {
    order: Vec<BlockHandle>,
    children: Vec<Child>,
    controller_mask: SigSet,
}

const CONTROLLER_SIGNALS: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTERM];

impl ProcessDriver {
    /// Prepare `composite` to run and build a driver for it. Does not
    /// fork anything yet; call [`ProcessDriver::start`] for that.
    pub fn new(composite: &mut Composite) -> Result<Self> {
        let order = composite.prepare_to_run()?;
        Ok(Self {
            order,
            children: Vec::new(),
            controller_mask: SigSet::empty(),
        })
    }

    /// Fork one child process per block, in execution order. Each child
    /// closes every file descriptor it doesn't own (every pipe end
    /// belonging to some other block) before running its block to
    /// completion and exiting.
    pub fn start(&mut self, composite: &mut Composite) -> Result<()> {
        let mut mask = SigSet::empty();
        for sig in CONTROLLER_SIGNALS {
            mask.add(sig);
        }
        // Block these before the first fork: a child that races to
        // exit before we call `wait` must not have its SIGCHLD
        // delivered (and discarded) while we're not yet listening.
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)?;
        self.controller_mask = mask;

        for &h in &self.order {
            let preserve = self.preserve_fds(composite, h);
            // SAFETY: the child immediately either execs nothing (it
            // stays in this process image) and only touches
            // async-signal-safe-equivalent Rust state private to this
            // block before exiting; it performs no further interaction
            // with the parent's threads (there are none) or shared
            // mutable state beyond what `fork()` already duplicated.
            match unsafe { fork() }? {
                ForkResult::Parent { child } => {
                    info!("process driver: forked {} as pid {child}", composite.block_name(h));
                    self.children.push(Child {
                        handle: h,
                        pid: child,
                        status: BlockStatus::Running,
                    });
                }
                ForkResult::Child => {
                    close_unrelated_fds(&preserve);
                    // Children don't wait on anything; restore default
                    // disposition so a direct signal to a child still
                    // terminates it normally.
                    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None);
                    let code = Self::run_block_to_exit(composite, h);
                    std::process::exit(code);
                }
            }
        }

        // Every pipe was created here, before any fork, so this process
        // still holds a copy of every fd even though none of them are
        // its own to use. Drop them now: otherwise this process counts
        // as a phantom extra reader and writer of every pipe for as
        // long as it sits in `wait()`, and no child ever sees real EOF.
        composite.close_all_pipes()?;
        Ok(())
    }

    fn run_block_to_exit(composite: &mut Composite, h: BlockHandle) -> i32 {
        let name = composite.block_name(h).to_string();
        let result = composite.block_mut(h).run();
        let cleanup_result = composite.block_mut(h).cleanup();
        match (result, cleanup_result) {
            (Ok(()), Ok(())) => 0,
            (Err(e), _) => {
                error!("{name}: {e}");
                1
            }
            (Ok(()), Err(e)) => {
                error!("{name}: cleanup failed: {e}");
                1
            }
        }
    }

    /// Every fd this block's ports (and any auxiliary files it opened)
    /// hold, plus stdio -- the set a forked child must keep open.
    fn preserve_fds(&self, composite: &Composite, h: BlockHandle) -> Vec<RawFd> {
        let block = composite.block(h);
        let mut fds: Vec<RawFd> = vec![0, 1, 2];
        for p in block.input_ports() {
            fds.extend(p.filenos());
        }
        for p in block.output_ports() {
            fds.extend(p.filenos());
        }
        fds.extend(block.files());
        fds
    }

    /// Block until every forked child has exited, reaping status as
    /// `SIGCHLD` arrives. Returns an error naming the first block whose
    /// process exited nonzero or was killed by a signal, after every
    /// child has been reaped (so failures are never left as zombies).
    pub fn wait(&mut self) -> Result<()> {
        let mut remaining = self.children.iter().filter(|c| c.status == BlockStatus::Running).count();
        let mut first_failure: Option<Error> = None;

        while remaining > 0 {
            let sig = self.controller_mask.wait()?;
            match sig {
                Signal::SIGCHLD => {
                    remaining -= self.reap_available(&mut first_failure);
                }
                Signal::SIGINT | Signal::SIGTERM => {
                    debug!("process driver: termination signal received, stopping children");
                    self.send_signal_to_running(Signal::SIGTERM)?;
                }
                _ => {}
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }
        Ok(())
    }

    /// Reap every child that's currently exitable without blocking.
    /// Returns how many newly-finished children were reaped.
    fn reap_available(&mut self, first_failure: &mut Option<Error>) -> usize {
        let mut reaped = 0;
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    reaped += 1;
                    self.mark(pid, BlockStatus::Exited(code), first_failure);
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    reaped += 1;
                    self.mark(pid, BlockStatus::Signaled(sig as i32), first_failure);
                }
                Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
                Ok(_) => continue, // stopped/continued: not a terminal state
                Err(_) => break,
            }
        }
        reaped
    }

    fn mark(&mut self, pid: Pid, status: BlockStatus, first_failure: &mut Option<Error>) {
        if let Some(c) = self.children.iter_mut().find(|c| c.pid == pid) {
            c.status = status;
            let failed = matches!(status, BlockStatus::Exited(code) if code != 0)
                || matches!(status, BlockStatus::Signaled(_));
            if failed && first_failure.is_none() {
                *first_failure = Some(Error::BlockRuntime {
                    block: format!("{:?}", c.handle),
                    detail: format!("{status:?}"),
                });
            }
        }
    }

    /// Send `SIGTERM` to every process still running, without waiting
    /// for them to exit. Call [`ProcessDriver::wait`] afterwards to
    /// reap them.
    pub fn stop(&self) -> Result<()> {
        self.send_signal_to_running(Signal::SIGTERM)
    }

    fn send_signal_to_running(&self, sig: Signal) -> Result<()> {
        for c in &self.children {
            if c.status == BlockStatus::Running {
                nix::sys::signal::kill(c.pid, sig)?;
            }
        }
        Ok(())
    }

    /// Current status of every block's process.
    #[must_use]
    pub fn status(&self) -> Vec<(BlockHandle, BlockStatus)> {
        self.children.iter().map(|c| (c.handle, c.status)).collect()
    }
}

/// Close every open fd except `preserve` (always includes 0/1/2). Used
/// in a forked child immediately after `fork()`, before the child runs
/// any block logic, so pipe ends belonging to sibling blocks don't keep
/// this child's copy of their fds around and mask real EOF.
fn close_unrelated_fds(preserve: &[RawFd]) {
    let max_fd = unsafe {
        let mut rl = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: `getrlimit` with `RLIMIT_NOFILE` writes a valid
        // `rlimit` into `rl` or returns nonzero; we only read the value
        // on success.
        if libc::getrlimit(libc::RLIMIT_NOFILE, rl.as_mut_ptr()) == 0 {
            rl.assume_init().rlim_cur as RawFd
        } else {
            1024
        }
    };
    for fd in 0..max_fd {
        if preserve.contains(&fd) {
            continue;
        }
        let _ = nix::unistd::close(fd);
    }
}
