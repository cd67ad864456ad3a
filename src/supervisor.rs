use crate::signal::{Action, HandoffSignals, SignalTable};
use crate::spawn::{ForwardTarget, Launched};

use log::{debug, trace};
use nix::errno::Errno;
use nix::sys::signal::{raise, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Single-threaded, signal-driven supervision of the one direct child.
/// Every catchable signal is already blocked, so the pending set is drained
/// one signal per iteration at the blocking wait below; there is no handler
/// state anywhere.
pub struct Supervisor {
    child_pid: Pid,
    target: ForwardTarget,
    table: SignalTable,
    handoff: HandoffSignals,
}

impl Supervisor {
    pub fn new(launched: Launched, table: SignalTable) -> Self {
        Self {
            child_pid: launched.child_pid,
            target: launched.target,
            table,
            handoff: launched.handoff,
        }
    }

    /// Runs until the direct child has been reaped; returns the status to
    /// exit with.
    pub fn run(mut self) -> i32 {
        let mask = SigSet::all();
        loop {
            let sig = match mask.wait() {
                Ok(sig) => sig,
                // Transient retrieval failures are retried; there is nothing
                // else to do at the top of the loop.
                Err(_) => continue,
            };
            debug!("Received signal {}.", sig as i32);

            if sig == Signal::SIGCHLD {
                if let Some(code) = self.reap() {
                    return code;
                }
                continue;
            }

            if self.handoff.consume(sig) {
                debug!("Ignoring tty hand-off signal {}.", sig as i32);
                continue;
            }

            match self.table.lookup(sig) {
                Action::Ignore => {
                    debug!("Not forwarding signal {} to children.", sig as i32);
                }
                Action::Forward(forwarded) => self.forward(forwarded),
                Action::ForwardAndSuspend(forwarded) => {
                    self.forward(forwarded);
                    debug!("Suspending self due to TTY signal.");
                    if let Err(err) = raise(Signal::SIGSTOP) {
                        trace!("unable to suspend ({}).", err.desc());
                    }
                }
            }
        }
    }

    fn forward(&self, sig: Signal) {
        // The target may already be gone; that is not an error worth more
        // than a trace.
        if let Err(err) = self.target.send(sig) {
            trace!("unable to forward signal {} ({}).", sig as i32, err.desc());
        }
        debug!("Forwarded signal {} to children.", sig as i32);
    }

    /// Collects every descendant the kernel has ready for us. Returns the
    /// exit status once the direct child itself has been reaped; orphans
    /// re-parented to us are acknowledged and dropped.
    fn reap(&mut self) -> Option<i32> {
        let code = self.drain()?;

        // Anything still running in the child's group gets told to go; in
        // single-child mode the target is the already-reaped child, so
        // nothing observable is signaled.
        self.forward(Signal::SIGTERM);
        self.drain();

        debug!("Child exited with status {}. Goodbye.", code);
        Some(code)
    }

    fn drain(&mut self) -> Option<i32> {
        let mut direct_exit = None;
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    if let Some((pid, code)) = exit_code(status) {
                        if pid == self.child_pid {
                            direct_exit = Some(code);
                        }
                    }
                }
                Err(Errno::EINTR) => continue,
                // ECHILD: nothing left to wait for.
                Err(_) => break,
            }
        }
        direct_exit
    }
}

fn exit_code(status: WaitStatus) -> Option<(Pid, i32)> {
    match status {
        WaitStatus::Exited(pid, code) => {
            debug!("A child with PID {} exited with exit status {}.", pid, code);
            Some((pid, code))
        }
        WaitStatus::Signaled(pid, sig, _) => {
            debug!(
                "A child with PID {} was terminated by signal {}.",
                pid, sig as i32
            );
            Some((pid, 128 + sig as i32))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_exit_statuses_pass_through() {
        let pid = Pid::from_raw(42);
        for code in [0, 1, 2, 32, 64, 127, 254, 255] {
            assert_eq!(exit_code(WaitStatus::Exited(pid, code)), Some((pid, code)));
        }
    }

    #[test]
    fn signal_deaths_map_to_128_plus_signum() {
        let pid = Pid::from_raw(42);
        for (sig, expected) in [
            (Signal::SIGHUP, 129),
            (Signal::SIGINT, 130),
            (Signal::SIGQUIT, 131),
            (Signal::SIGKILL, 137),
            (Signal::SIGTERM, 143),
        ] {
            assert_eq!(
                exit_code(WaitStatus::Signaled(pid, sig, false)),
                Some((pid, expected))
            );
            assert_eq!(
                exit_code(WaitStatus::Signaled(pid, sig, true)),
                Some((pid, expected))
            );
        }
    }

    #[test]
    fn job_state_changes_are_not_exits() {
        let pid = Pid::from_raw(42);
        assert_eq!(exit_code(WaitStatus::StillAlive), None);
        assert_eq!(exit_code(WaitStatus::Stopped(pid, Signal::SIGTSTP)), None);
        assert_eq!(exit_code(WaitStatus::Continued(pid)), None);
    }
}
