//! Seat (C5): owns at most one live Session, a one-slot pending-switch
//! buffer, and the read end of the child-death notification pipe.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::session::{RealSpawner, Session, SessionSpawner};
use crate::{trace, warn};

/// `(service, user, password)`, any of which may be absent, captured by
/// `switch_user` while a session is still alive.
pub type PendingTriple = (Option<String>, Option<String>, Option<String>);

/// Observers a Seat notifies of lifecycle events. The no-op default
/// always allows auto-relogin.
pub trait SeatObserver {
    fn prepare_user(&mut self, _username: &str) {}
    fn session_terminated(&mut self, _seat_id: &str) -> bool {
        true
    }
}

pub struct NoopObserver;
impl SeatObserver for NoopObserver {}

pub struct Seat {
    id: String,
    path: String,
    config: Rc<Config>,
    session: Option<Session>,
    pending: Option<PendingTriple>,
    notify_read_fd: RawFd,
    notify_write_fd: RawFd,
    observer: Box<dyn SeatObserver>,
    spawner: Box<dyn SessionSpawner>,
}

impl Seat {
    pub fn new(config: Rc<Config>, id: &str, path: &str) -> Result<Seat> {
        Seat::with_collaborators(config, id, path, Box::new(NoopObserver), Box::new(RealSpawner))
    }

    /// Same as `new`, but with the observer and spawner injectable. This
    /// is the seam unit tests use to exercise the state machine without a
    /// real fork or PAM transaction.
    pub fn with_collaborators(
        config: Rc<Config>,
        id: &str,
        path: &str,
        observer: Box<dyn SeatObserver>,
        spawner: Box<dyn SessionSpawner>,
    ) -> Result<Seat> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        Ok(Seat {
            id: id.to_string(),
            path: path.to_string(),
            config,
            session: None,
            pending: None,
            notify_read_fd: fds[0],
            notify_write_fd: fds[1],
            observer,
            spawner,
        })
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_path(&self) -> &str {
        &self.path
    }

    /// Fd to register with the event loop; readable when a child has
    /// died (spec's `notify_channel`, I3).
    pub fn notify_fd(&self) -> RawFd {
        self.notify_read_fd
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Fails (returns `Ok(false)`) if a session is already running;
    /// otherwise resolves defaults and constructs one.
    pub fn create_session(
        &mut self,
        service: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool> {
        if self.session.is_some() {
            return Ok(false);
        }

        let resolved_service = service
            .map(|s| s.to_string())
            .or_else(|| self.config.get_string_fallback(&self.id, config::KEY_PAM_SERVICE));

        let resolved_user = match user {
            Some(u) => Some(u.to_string()),
            None => {
                if let Some(template) = self.config.get_string_fallback(&self.id, config::KEY_DEFAULT_USER) {
                    let name = build_name(&template, &self.id);
                    self.observer.prepare_user(&name);
                    Some(name)
                } else {
                    None
                }
            }
        };

        let session = Session::new(
            Rc::clone(&self.config),
            &self.id,
            resolved_service.as_deref().unwrap_or(""),
            resolved_user.as_deref(),
            password.unwrap_or(""),
            HashMap::new(),
            self.notify_write_fd,
            self.spawner.as_ref(),
        )?;

        self.session = Some(session);
        Ok(true)
    }

    /// If no session is running, identical to `create_session`. Else:
    /// replaces any prior pending triple (never queues) and asks the
    /// running session to terminate; the switch is honored once its
    /// death is observed.
    pub fn switch_user(
        &mut self,
        service: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool> {
        if self.session.is_none() {
            return self.create_session(service, user, password);
        }

        self.pending = Some((
            service.map(|s| s.to_string()),
            user.map(|s| s.to_string()),
            password.map(|s| s.to_string()),
        ));

        if let Some(session) = &self.session {
            session.terminate();
        }
        Ok(true)
    }

    pub fn terminate_session(&self) -> bool {
        match &self.session {
            Some(session) => {
                session.terminate();
                true
            }
            None => false,
        }
    }

    /// Called by the event loop when `notify_fd()` is readable. Reads
    /// the dead child's pid, reaps its exit status, drops the Session,
    /// notifies observers, and honors auto-login/pending-switch policy.
    pub fn handle_child_death(&mut self) {
        let mut buf = [0u8; std::mem::size_of::<i64>()];
        let n = unsafe {
            libc::read(
                self.notify_read_fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n != buf.len() as isize {
            warn!("short read on notify pipe for seat {}", self.id);
        }
        let pid = i64::from_ne_bytes(buf);
        trace!("handling session termination for pid {} on {}", pid, self.id);

        match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
            Ok(_) => {}
            Err(e) => warn!("waitpid({}) failed: {}", pid, e),
        }

        self.session = None;

        if !self.observer.session_terminated(&self.id) {
            return;
        }

        if self.config.get_bool(config::GENERAL, config::KEY_AUTO_LOGIN, true) {
            let (service, user, password) = self.pending.take().unwrap_or((None, None, None));
            if let Err(e) = self.create_session(service.as_deref(), user.as_deref(), password.as_deref()) {
                warn!("auto-relogin on seat {} failed: {}", self.id, e);
            }
        }
    }
}

impl Drop for Seat {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.notify_read_fd);
            libc::close(self.notify_write_fd);
        }
    }
}

/// Pure substitution used by `create_session`'s default-user resolution:
/// `%S` becomes the seat's numeric suffix (0 and a warning if `seat_id`
/// doesn't start with `seat`), `%I` becomes the full seat id, and any
/// other `%X` sequence is dropped along with its `%`.
pub fn build_name(template: &str, seat_id: &str) -> String {
    let seat_num: i64 = if let Some(rest) = seat_id.strip_prefix("seat") {
        rest.parse().unwrap_or(0)
    } else {
        warn!("unrecognized seat id format: {}", seat_id);
        0
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('S') => out.push_str(&seat_num.to_string()),
                Some('I') => out.push_str(seat_id),
                Some(_) | None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_name_substitutes_seat_number_and_id() {
        assert_eq!(build_name("user%S-%I", "seat3"), "user3-seat3");
    }

    #[test]
    fn build_name_passes_through_plain_names() {
        assert_eq!(build_name("alice", "seat0"), "alice");
    }

    #[test]
    fn build_name_drops_unknown_sequences() {
        assert_eq!(build_name("u%X", "seat1"), "u");
    }

    #[test]
    fn build_name_defaults_to_zero_on_bad_seat_id() {
        assert_eq!(build_name("guest%S", "weird-id"), "guest0");
    }

    struct RecordingObserver {
        prepared: Vec<String>,
        terminated: Vec<String>,
        veto: bool,
    }

    impl SeatObserver for RecordingObserver {
        fn prepare_user(&mut self, username: &str) {
            self.prepared.push(username.to_string());
        }
        fn session_terminated(&mut self, seat_id: &str) -> bool {
            self.terminated.push(seat_id.to_string());
            !self.veto
        }
    }

    fn test_config() -> Rc<Config> {
        let mut config = Config::empty();
        config.set_string(config::GENERAL, config::KEY_AUTO_LOGIN, "true");
        config.set_string(config::GENERAL, config::KEY_DEFAULT_USER, "guest%S");
        config.set_string(config::GENERAL, config::KEY_SESSION_CMD, "/bin/echo hi");
        Rc::new(config)
    }

    struct NoopSpawner;
    impl SessionSpawner for NoopSpawner {
        fn spawn(&self, _ctx: &crate::session::SpawnContext) -> Result<Pid> {
            Err(Error::Fork(std::io::Error::new(std::io::ErrorKind::Other, "no pam in tests")))
        }
    }

    #[test]
    fn child_death_without_auto_login_does_not_relogin() {
        let mut config = Config::empty();
        config.set_string(config::GENERAL, config::KEY_AUTO_LOGIN, "false");
        let config = Rc::new(config);

        let mut seat = Seat::with_collaborators(
            config,
            "seat0",
            "/seat0",
            Box::new(RecordingObserver {
                prepared: vec![],
                terminated: vec![],
                veto: false,
            }),
            Box::new(NoopSpawner),
        )
        .unwrap();

        seat.pending = Some((None, Some("bob".to_string()), None));

        let pid: i64 = 4242;
        let buf = pid.to_ne_bytes();
        unsafe {
            libc::write(
                seat.notify_write_fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            );
        }

        seat.handle_child_death();

        assert!(seat.session.is_none());
        // AutoLogin=false: pending survives whatever create_session would
        // otherwise have consumed, since that branch is never entered.
        assert!(seat.pending.is_some());
    }

    #[test]
    fn pending_is_replaced_not_queued() {
        let config = test_config();
        let mut seat = Seat::with_collaborators(
            config,
            "seat0",
            "/seat0",
            Box::new(NoopObserver),
            Box::new(NoopSpawner),
        )
        .unwrap();
        seat.pending = Some((None, Some("bob".to_string()), None));
        seat.pending = Some((None, Some("carol".to_string()), None));
        assert_eq!(seat.pending.as_ref().unwrap().1.as_deref(), Some("carol"));
    }
}
