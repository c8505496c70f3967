//! Minimal stderr logging.
//!
//! Deliberately not a logging facade crate: plain `eprintln!` with a
//! `[logind-core]` prefix, debug-gated by an environment variable rather
//! than a verbosity level. Nothing here is safe to call from the SIGCHLD
//! handler, see `reaper.rs`.

pub fn debug_enabled() -> bool {
    std::env::var_os("TLM_DEBUG").is_some()
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::log::debug_enabled() {
            eprintln!("[logind-core] {}", format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!("[logind-core] WARN: {}", format!($($arg)*));
    };
}
