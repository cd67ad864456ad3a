use crate::package::NAME;
use crate::signal::HandoffSignals;

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, signal, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{execvp, fork, getpid, getsid, setsid, ForkResult, Pid};
use std::ffi::CString;
use std::io::{self, IsTerminal};
use std::os::fd::RawFd;
use std::process::exit;

/// Where forwarded signals go: the child's whole process group in setsid
/// mode, the child alone otherwise.
#[derive(Debug, Clone, Copy)]
pub enum ForwardTarget {
    Group(Pid),
    Child(Pid),
}

impl ForwardTarget {
    pub fn send(self, sig: Signal) -> nix::Result<()> {
        match self {
            ForwardTarget::Group(pgid) => killpg(pgid, sig),
            ForwardTarget::Child(pid) => kill(pid, sig),
        }
    }
}

pub struct Launched {
    pub child_pid: Pid,
    pub target: ForwardTarget,
    pub handoff: HandoffSignals,
}

/// Fork and exec the command. Returns only in the parent, with every
/// catchable signal blocked so the supervisor loop observes them solely at
/// its blocking retrieval point.
pub fn launch(command: &[String], use_setsid: bool) -> nix::Result<Launched> {
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Errno::EINVAL)?;

    // Captured before the fork: whether we hold the session, and with it
    // the controlling terminal the child is about to take over.
    let was_session_leader = getsid(None)? == getpid();

    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), None)?;

    let tty_fd: Option<RawFd> = io::stdin().is_terminal().then_some(libc::STDIN_FILENO);
    let handoff = detach_tty(use_setsid, was_session_leader, tty_fd);

    match unsafe { fork() }? {
        ForkResult::Child => exec_child(&argv, command, use_setsid, tty_fd),
        ForkResult::Parent { child } => {
            debug!("Child spawned with PID {}.", child);
            let target = if use_setsid {
                ForwardTarget::Group(child)
            } else {
                ForwardTarget::Child(child)
            };
            Ok(Launched {
                child_pid: child,
                target,
                handoff,
            })
        }
    }
}

// In setsid mode the child's new session has to acquire the controlling
// terminal, which means giving ours up first. A process that led the
// session at startup is owed one SIGHUP and one SIGCONT as the terminal
// changes hands; those must not be forwarded to the child.
fn detach_tty(use_setsid: bool, was_session_leader: bool, tty_fd: Option<RawFd>) -> HandoffSignals {
    if use_setsid {
        if let Some(fd) = tty_fd {
            if unsafe { libc::ioctl(fd, libc::TIOCNOTTY) } == 0 {
                debug!("Detached from controlling tty so the child's session can attach to it.");
            } else {
                debug!(
                    "Unable to detach from controlling tty ({}).",
                    Errno::last().desc()
                );
            }
        }
    }

    if was_session_leader {
        debug!("Was the session leader at startup, so expecting a tty hand-off SIGHUP and SIGCONT.");
    }

    handoff_signals(was_session_leader)
}

// Arming depends only on having led the session at startup. The stray pair
// can reach us through the foreground-group change even when our own detach
// attempt failed or was skipped, so the detach outcome plays no part here.
fn handoff_signals(was_session_leader: bool) -> HandoffSignals {
    if was_session_leader {
        HandoffSignals::armed()
    } else {
        HandoffSignals::default()
    }
}

fn exec_child(argv: &[CString], command: &[String], use_setsid: bool, tty_fd: Option<RawFd>) -> ! {
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);

    // Dispositions inherited as ignored would survive the exec.
    for sig in Signal::iterator() {
        if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        unsafe {
            let _ = signal(sig, SigHandler::SigDfl);
        }
    }

    if use_setsid {
        if let Err(err) = setsid() {
            eprintln!("[{NAME}] Unable to setsid ({}). Exiting.", err.desc());
            exit(1);
        }

        if let Some(fd) = tty_fd {
            // Acquire stdin as the new session's controlling terminal; our
            // process group becomes its foreground group with it.
            if unsafe { libc::ioctl(fd, libc::TIOCSCTTY, 0) } == -1 {
                debug!(
                    "Unable to attach to controlling tty ({}).",
                    Errno::last().desc()
                );
            }
        }
        debug!("setsid complete.");
    }

    let err = match execvp(&argv[0], argv) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    eprintln!("[{NAME}] {}: {}", command[0], err.desc());
    exit(if err == Errno::ENOENT { 2 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_leader_arms_the_handoff_set() {
        assert_eq!(handoff_signals(true), HandoffSignals::armed());
        assert_eq!(handoff_signals(false), HandoffSignals::default());
    }

    #[test]
    fn arming_ignores_mode_and_detach_outcome() {
        // Without a tty the detach attempt is skipped, the failure case of
        // the detach; arming must come out the same in every mode.
        for use_setsid in [true, false] {
            assert_eq!(detach_tty(use_setsid, true, None), HandoffSignals::armed());
            assert_eq!(detach_tty(use_setsid, false, None), HandoffSignals::default());
        }
    }
}
