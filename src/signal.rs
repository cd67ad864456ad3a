use nix::sys::signal::Signal;

// Highest signal number the rewrite table covers. SIGKILL and SIGSTOP fall
// inside the range but can never be caught, so their slots are never read.
pub const MAXSIG: i32 = 31;

// The three signals that stop a foreground job. When one of these arrives
// the supervisor has to stop alongside the child, or job control in the
// outer shell breaks.
const JOB_CONTROL_SIGNALS: [Signal; 3] = [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Drop the signal entirely.
    Ignore,
    /// Send the signal to the forwarding target.
    Forward(Signal),
    /// Send the signal to the forwarding target, then SIGSTOP ourselves.
    ForwardAndSuspend(Signal),
}

/// Per-signal actions, fixed at startup: identity forwarding overlaid with
/// the job-control defaults for the current mode, then with user rewrites.
pub struct SignalTable {
    actions: [Action; (MAXSIG + 1) as usize],
}

impl SignalTable {
    pub fn new(use_setsid: bool, rewrites: &[(Signal, Option<Signal>)]) -> Self {
        let mut actions = [Action::Ignore; (MAXSIG + 1) as usize];

        for signal in Signal::iterator() {
            let signum = signal as usize;
            if signum <= MAXSIG as usize {
                actions[signum] = Action::Forward(signal);
            }
        }

        for &signal in &JOB_CONTROL_SIGNALS {
            // In setsid mode the whole group is stopped at once, so the
            // distinction between TSTP/TTIN/TTOU is already lost; normalize
            // to SIGTSTP.
            let forwarded = if use_setsid { Signal::SIGTSTP } else { signal };
            actions[signal as usize] = Action::ForwardAndSuspend(forwarded);
        }

        for &(from, to) in rewrites {
            actions[from as usize] = match to {
                None => Action::Ignore,
                Some(to) if use_setsid && JOB_CONTROL_SIGNALS.contains(&from) => {
                    Action::ForwardAndSuspend(to)
                }
                Some(to) => Action::Forward(to),
            };
        }

        Self { actions }
    }

    pub fn lookup(&self, signal: Signal) -> Action {
        self.actions[signal as usize]
    }
}

/// The one SIGHUP and one SIGCONT the kernel sends the old session leader's
/// group when the controlling terminal is handed over to the child's
/// session. Each is swallowed at most once; later arrivals are forwarded
/// like any other signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandoffSignals {
    hangup: bool,
    cont: bool,
}

impl HandoffSignals {
    pub fn armed() -> Self {
        Self {
            hangup: true,
            cont: true,
        }
    }

    /// Returns true if `signal` should be swallowed, consuming its slot.
    pub fn consume(&mut self, signal: Signal) -> bool {
        let slot = match signal {
            Signal::SIGHUP => &mut self.hangup,
            Signal::SIGCONT => &mut self.cont,
            _ => return false,
        };
        std::mem::replace(slot, false)
    }
}
