//! Session (C4): wraps an authentication transaction, forks, and drives
//! the forked child through privilege drop, TTY setup, environment
//! assembly, and exec.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{
    chdir, execvpe, fork, initgroups, setregid, setreuid, setsid, ForkResult, Gid, Pid, Uid,
};

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::pam::{AuthOutcome, AuthSession};
use crate::tokenize;
use users::os::unix::UserExt;
use crate::{trace, warn};

/// Everything the forked child needs in order to become the target
/// user's session, computed in the parent before `fork()` so the child
/// does no fallible lookups of its own beyond what's already resolved.
pub struct SpawnContext {
    pub setup_terminal: bool,
    pub target_uid: u32,
    pub target_gid: u32,
    pub username: String,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub session_path: String,
    pub data_dirs: String,
    pub xdg_seat: String,
    pub pam_envlist: Vec<String>,
    pub env_overrides: HashMap<String, String>,
    pub session_cmd: Option<String>,
}

/// Abstracts the fork+child-setup step so the Seat/Session state machine
/// can be exercised without forking a real process or touching PAM.
pub trait SessionSpawner {
    fn spawn(&self, ctx: &SpawnContext) -> Result<Pid>;
}

pub struct RealSpawner;

impl SessionSpawner for RealSpawner {
    fn spawn(&self, ctx: &SpawnContext) -> Result<Pid> {
        match fork()
            .map_err(|e| Error::Fork(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
        {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                if let Err(e) = run_child(ctx) {
                    warn!("session child exiting: {}", e);
                }
                std::process::exit(1);
            }
        }
    }
}

/// Child branch: terminal setup, privilege drop, environment assembly,
/// then exec. Never returns on success; on failure returns the error for
/// the caller to log before `std::process::exit(1)`.
fn run_child(ctx: &SpawnContext) -> Result<()> {
    if ctx.setup_terminal {
        if let Err(e) = setup_terminal() {
            warn!("terminal setup failed: {}", e);
        }
    }

    if nix::unistd::getppid().as_raw() == 1 {
        let _ = setsid();
        unsafe {
            if libc::ioctl(0, libc::TIOCSCTTY as libc::c_ulong, 1) != 0 {
                warn!("TIOCSCTTY failed: {}", std::io::Error::last_os_error());
            }
        }
    }

    unsafe {
        libc::fchown(0, ctx.target_uid, u32::MAX);
    }

    drop_privileges(ctx)?;

    let envp = build_environment(ctx);

    if let Some(home) = &ctx.home {
        if let Err(e) = chdir(home.as_str()) {
            warn!("chdir to {} failed: {}", home, e);
        }
    }

    let argv = resolve_argv(ctx)?;

    let cargv: Vec<CString> = argv
        .iter()
        .map(|s| CString::new(s.as_str()).unwrap_or_else(|_| CString::new("").unwrap()))
        .collect();
    let cargv_refs: Vec<&CString> = cargv.iter().collect();

    let err = execvpe(&cargv[0], &cargv_refs, &envp).unwrap_err();
    Err(Error::Exec(std::io::Error::from_raw_os_error(err as i32)))
}

fn setup_terminal() -> Result<()> {
    let name = unsafe {
        let ptr = libc::ttyname(0);
        if ptr.is_null() {
            return Err(Error::Tty("ttyname(0) failed".to_string()));
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    };
    if !name.starts_with("/dev/") {
        return Err(Error::Tty(format!("tty {} not under /dev", name)));
    }

    let cname = CString::new(name.clone()).map_err(|_| Error::Tty("tty name has NUL".to_string()))?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(cname.as_ptr(), &mut st) } != 0 {
        return Err(Error::Tty(format!("stat({}) failed", name)));
    }
    if st.st_mode & libc::S_IFMT != libc::S_IFCHR {
        return Err(Error::Tty(format!("{} is not a character device", name)));
    }
    if st.st_nlink != 1 {
        return Err(Error::Tty(format!("{} has more than one link", name)));
    }

    let fd = unsafe { libc::open(cname.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(Error::Tty(format!("open({}) failed", name)));
    }
    if unsafe { libc::isatty(fd) } != 1 {
        unsafe {
            libc::close(fd);
        }
        return Err(Error::Tty(format!("{} failed isatty", name)));
    }

    unsafe {
        libc::ioctl(fd, libc::TIOCSPGRP as libc::c_ulong, &(libc::getpid()) as *const _);
        for lower in 0..fd {
            libc::close(lower);
        }
        libc::dup2(fd, 0);
        libc::dup2(fd, 1);
        libc::dup2(fd, 2);
        if fd > 2 {
            libc::close(fd);
        }
    }
    Ok(())
}

fn drop_privileges(ctx: &SpawnContext) -> Result<()> {
    let cname = CString::new(ctx.username.as_str())
        .map_err(|_| Error::PrivilegeDrop("username has embedded NUL".to_string()))?;

    initgroups(&cname, Gid::from_raw(ctx.target_gid))
        .map_err(|e| Error::PrivilegeDrop(format!("initgroups: {}", e)))?;
    setregid(Gid::from_raw(ctx.target_gid), Gid::from_raw(ctx.target_gid))
        .map_err(|e| Error::PrivilegeDrop(format!("setregid: {}", e)))?;
    setreuid(Uid::from_raw(ctx.target_uid), Uid::from_raw(ctx.target_uid))
        .map_err(|e| Error::PrivilegeDrop(format!("setreuid: {}", e)))?;
    Ok(())
}

/// Builds the child's `envp` array: PAM's env list first, then the
/// unconditional set, then `env_overrides` last so callers can override
/// anything above.
fn build_environment(ctx: &SpawnContext) -> Vec<CString> {
    let mut vars: Vec<(String, String)> = Vec::new();

    for kv in &ctx.pam_envlist {
        if let Some(eq) = kv.find('=') {
            vars.push((kv[..eq].to_string(), kv[eq + 1..].to_string()));
        }
    }

    vars.push(("PATH".to_string(), ctx.session_path.clone()));
    vars.push(("USER".to_string(), ctx.username.clone()));
    vars.push(("LOGNAME".to_string(), ctx.username.clone()));
    if let Some(home) = &ctx.home {
        vars.push(("HOME".to_string(), home.clone()));
    }
    if let Some(shell) = &ctx.shell {
        vars.push(("SHELL".to_string(), shell.clone()));
    }
    vars.push(("XDG_SEAT".to_string(), ctx.xdg_seat.clone()));
    vars.push(("XDG_DATA_DIRS".to_string(), ctx.data_dirs.clone()));

    for (k, v) in &ctx.env_overrides {
        vars.push((k.clone(), v.clone()));
    }

    vars.into_iter()
        .filter_map(|(k, v)| CString::new(format!("{}={}", k, v)).ok())
        .collect()
}

fn resolve_argv(ctx: &SpawnContext) -> Result<Vec<String>> {
    match &ctx.session_cmd {
        Some(cmd) => tokenize::tokenize(cmd),
        None => Ok(tokenize::fallback_argv(ctx.shell.as_deref())),
    }
}

/// One authenticated session bound to a seat. Constructed, runs PAM
/// synchronously, forks, and is then only ever torn down (never
/// re-forked).
pub struct Session {
    config: Rc<Config>,
    seat_id: String,
    username: String,
    notify_fd: RawFd,
    child_pid: Pid,
    tty_uid: u32,
    tty_gid: u32,
}

impl Session {
    /// Drives authentication synchronously; on success forks via
    /// `spawner` and returns a live `Session` whose `child_pid` is
    /// already registered with the caller's reaper. Returns an error
    /// without forking if authentication or session setup fails.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Rc<Config>,
        seat_id: &str,
        service: &str,
        username: Option<&str>,
        password: &str,
        env_overrides: HashMap<String, String>,
        notify_fd: RawFd,
        spawner: &dyn SessionSpawner,
    ) -> Result<Session> {
        let mut auth = AuthSession::new(service, username, password);
        auth.put_env("XDG_SEAT", seat_id);

        let (resolved_username, envlist, pam) = match auth.start() {
            AuthOutcome::SessionCreated {
                username, envlist, pam,
            } => (username, envlist, pam),
            AuthOutcome::AuthError(msg) => return Err(Error::Auth(msg)),
            AuthOutcome::SessionError(msg) => return Err(Error::SessionSetup(msg)),
        };

        let final_username = if let Some(u) = username {
            if u.is_empty() {
                resolved_username
            } else {
                u.to_string()
            }
        } else {
            resolved_username
        };

        let tty_uid;
        let tty_gid;
        unsafe {
            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(0, &mut st) == 0 {
                tty_uid = st.st_uid;
                tty_gid = st.st_gid;
            } else {
                tty_uid = 0;
                tty_gid = 0;
            }
        }

        let user = users::get_user_by_name(&final_username)
            .ok_or_else(|| Error::UnknownUser(final_username.clone()))?;

        let ctx = SpawnContext {
            setup_terminal: config.get_bool(seat_id, config::KEY_SETUP_TERMINAL, false),
            target_uid: user.uid(),
            target_gid: user.primary_group_id(),
            username: final_username.clone(),
            home: user.home_dir().to_str().map(|s| s.to_string()),
            shell: user.shell().to_str().map(|s| s.to_string()),
            session_path: config.session_path(),
            data_dirs: config.data_dirs(),
            xdg_seat: seat_id.to_string(),
            pam_envlist: envlist,
            env_overrides,
            session_cmd: config.get_string_fallback(seat_id, config::KEY_SESSION_CMD),
        };

        let child_pid = spawner.spawn(&ctx)?;
        // Released now that session-created has fired and the fork has
        // completed: PamSession's Drop calls pam_end.
        std::mem::drop(pam);

        crate::reaper::install_handler();
        crate::reaper::register(child_pid.as_raw() as i64, notify_fd);

        trace!(
            "session for {} on {} started, child pid {}",
            final_username,
            seat_id,
            child_pid
        );

        Ok(Session {
            config,
            seat_id: seat_id.to_string(),
            username: final_username,
            notify_fd,
            child_pid,
            tty_uid,
            tty_gid,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn seat_id(&self) -> &str {
        &self.seat_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    pub fn notify_fd(&self) -> RawFd {
        self.notify_fd
    }

    /// `SIGHUP` then `SIGTERM`; no escalation to `SIGKILL`.
    pub fn terminate(&self) {
        if let Err(e) = kill(self.child_pid, Signal::SIGHUP) {
            warn!("SIGHUP to {} failed: {}", self.child_pid, e);
        }
        if let Err(e) = kill(self.child_pid, Signal::SIGTERM) {
            warn!("SIGTERM to {} failed: {}", self.child_pid, e);
        }
    }

    pub fn reset_tty(&self) {
        unsafe {
            libc::fchown(0, self.tty_uid, self.tty_gid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeSpawner {
        pid: i32,
        calls: Cell<u32>,
    }

    impl SessionSpawner for FakeSpawner {
        fn spawn(&self, _ctx: &SpawnContext) -> Result<Pid> {
            self.calls.set(self.calls.get() + 1);
            Ok(Pid::from_raw(self.pid))
        }
    }

    #[test]
    fn spawner_is_called_exactly_once_on_success() {
        // Exercises the spawner trait boundary; full Session::new also
        // depends on a real system user existing, so only the spawner
        // contract is unit-tested here.
        let spawner = FakeSpawner {
            pid: 4242,
            calls: Cell::new(0),
        };
        let ctx = SpawnContext {
            setup_terminal: false,
            target_uid: 1000,
            target_gid: 1000,
            username: "nobody".to_string(),
            home: None,
            shell: None,
            session_path: "/bin".to_string(),
            data_dirs: "/usr/share".to_string(),
            xdg_seat: "seat0".to_string(),
            pam_envlist: vec![],
            env_overrides: HashMap::new(),
            session_cmd: Some("/bin/echo hi".to_string()),
        };
        let pid = spawner.spawn(&ctx).unwrap();
        assert_eq!(pid.as_raw(), 4242);
        assert_eq!(spawner.calls.get(), 1);
    }

    #[test]
    fn resolve_argv_uses_session_cmd_when_set() {
        let ctx = SpawnContext {
            setup_terminal: false,
            target_uid: 0,
            target_gid: 0,
            username: "u".to_string(),
            home: None,
            shell: Some("/bin/zsh".to_string()),
            session_path: String::new(),
            data_dirs: String::new(),
            xdg_seat: "seat0".to_string(),
            pam_envlist: vec![],
            env_overrides: HashMap::new(),
            session_cmd: Some("/usr/bin/env FOO='hello world' \"bar baz\"".to_string()),
        };
        assert_eq!(
            resolve_argv(&ctx).unwrap(),
            vec!["/usr/bin/env", "FOO=hello world", "bar baz"]
        );
    }

    #[test]
    fn resolve_argv_falls_back_to_shell() {
        let ctx = SpawnContext {
            setup_terminal: false,
            target_uid: 0,
            target_gid: 0,
            username: "u".to_string(),
            home: None,
            shell: Some("/bin/zsh".to_string()),
            session_path: String::new(),
            data_dirs: String::new(),
            xdg_seat: "seat0".to_string(),
            pam_envlist: vec![],
            env_overrides: HashMap::new(),
            session_cmd: None,
        };
        assert_eq!(resolve_argv(&ctx).unwrap(), vec!["/bin/zsh"]);
    }
}
