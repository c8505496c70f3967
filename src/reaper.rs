//! Child Reaper: a process-wide `pid -> notify fd` table and a single
//! `SIGCHLD` handler, async-signal-safe by construction.
//!
//! The table never shrinks its backing storage and is never freed; its
//! lifetime is the process's. It is a fixed-size, open-addressed slot
//! array so the signal handler can claim/clear slots with nothing but
//! atomic loads/stores: no allocation, no mutex, no logging that
//! allocates.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

const TABLE_SIZE: usize = 256;

struct Slot {
    occupied: AtomicBool,
    pid: AtomicI64,
    fd: AtomicI32,
}

const SLOT_INIT: Slot = Slot {
    occupied: AtomicBool::new(false),
    pid: AtomicI64::new(0),
    fd: AtomicI32::new(-1),
};

static TABLE: [Slot; TABLE_SIZE] = [SLOT_INIT; TABLE_SIZE];
static INSTALLED: AtomicBool = AtomicBool::new(false);

fn slot_index(pid: i64) -> usize {
    (pid.unsigned_abs() as usize) % TABLE_SIZE
}

/// Record that `pid`'s death should be reported by writing its pid to
/// `notify_fd`. Called from the event-loop thread right after `fork()`,
/// never from signal context.
pub fn register(pid: i64, notify_fd: i32) {
    let start = slot_index(pid);
    for i in 0..TABLE_SIZE {
        let idx = (start + i) % TABLE_SIZE;
        let slot = &TABLE[idx];
        if !slot.occupied.load(Ordering::Acquire) {
            slot.pid.store(pid, Ordering::Relaxed);
            slot.fd.store(notify_fd, Ordering::Relaxed);
            slot.occupied.store(true, Ordering::Release);
            return;
        }
    }
    crate::warn!("reaper table full, dropping registration for pid {}", pid);
}

/// Install the process-wide `SIGCHLD` handler. Idempotent: subsequent
/// calls are no-ops.
pub fn install_handler() {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handle_sigchld as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaddset(&mut sa.sa_mask, libc::SIGCHLD);
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            crate::warn!(
                "failed to install SIGCHLD handler: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

/// The actual signal handler. Async-signal-safe: table lookup/removal is
/// lock-free, the pipe write is a single `write(2)`, and on failure we
/// swallow it rather than calling into anything that allocates or locks.
extern "C" fn handle_sigchld(
    _signum: libc::c_int,
    siginfo: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    if siginfo.is_null() {
        return;
    }
    let pid = unsafe { (*siginfo).si_pid() } as i64;
    if pid == 0 {
        return;
    }

    let start = slot_index(pid);
    for i in 0..TABLE_SIZE {
        let idx = (start + i) % TABLE_SIZE;
        let slot = &TABLE[idx];
        if slot.occupied.load(Ordering::Acquire) && slot.pid.load(Ordering::Relaxed) == pid {
            let fd = slot.fd.load(Ordering::Relaxed);
            let buf = pid.to_ne_bytes();
            unsafe {
                libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len());
            }
            slot.occupied.store(false, Ordering::Release);
            return;
        }
    }
    // No notify entry found for this pid: silently return. Nothing
    // signal-safe to log to here without a facade that allocates.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        // Exercise the same slot-scan logic the signal handler uses,
        // without going through an actual signal.
        register(999_001, 42);
        let idx = slot_index(999_001);
        let mut found = false;
        for i in 0..TABLE_SIZE {
            let probe = (idx + i) % TABLE_SIZE;
            if TABLE[probe].occupied.load(Ordering::Acquire)
                && TABLE[probe].pid.load(Ordering::Relaxed) == 999_001
            {
                assert_eq!(TABLE[probe].fd.load(Ordering::Relaxed), 42);
                found = true;
                break;
            }
        }
        assert!(found);
    }
}
