//! Safe wrapper around `pam-sys`, and on top of it, the staged
//! callback-driven `AuthSession` that drives a full PAM transaction from
//! a caller-supplied (service, username, password) triple.

use std::pin::Pin;
use std::ptr;

use pam_sys::{PamFlag, PamHandle, PamItemType, PamReturnCode};

use super::converse::{Converse, StaticConverse};
use super::ffi::{make_conversation, PamConvHandlerWrapper};
use crate::error::{Error, Result};

/// Thin, safe wrapper over one `pam_handle_t`. Each method maps to a
/// single `pam_sys` call and turns a non-`PAM_SUCCESS` return code into
/// `Error::Pam`.
pub struct PamSession {
    handle: *mut PamHandle,
    // Kept alive for the lifetime of the PAM transaction: the
    // conversation struct handed to `pam_start` holds a raw pointer into
    // this box.
    _conv: Pin<Box<PamConvHandlerWrapper<'static>>>,
}

impl PamSession {
    pub fn start(service: &str, user: &str, conv: Pin<Box<dyn Converse + 'static>>) -> Result<Self> {
        let mut wrapper = Box::pin(PamConvHandlerWrapper { handler: conv });
        let pam_conv = make_conversation(&mut wrapper);

        let mut handle: *mut PamHandle = ptr::null_mut();
        let rc = unsafe { pam_sys::start(service, Some(user), &pam_conv, &mut handle) };
        check(rc, "pam_start")?;

        Ok(PamSession {
            handle,
            _conv: wrapper,
        })
    }

    pub fn authenticate(&mut self, flags: PamFlag) -> Result<()> {
        check(
            unsafe { pam_sys::authenticate(self.handle, flags) },
            "pam_authenticate",
        )
    }

    pub fn acct_mgmt(&mut self, flags: PamFlag) -> Result<()> {
        check(
            unsafe { pam_sys::acct_mgmt(self.handle, flags) },
            "pam_acct_mgmt",
        )
    }

    pub fn setcred(&mut self, flags: PamFlag) -> Result<()> {
        check(unsafe { pam_sys::setcred(self.handle, flags) }, "pam_setcred")
    }

    pub fn open_session(&mut self, flags: PamFlag) -> Result<()> {
        check(
            unsafe { pam_sys::open_session(self.handle, flags) },
            "pam_open_session",
        )
    }

    pub fn close_session(&mut self, flags: PamFlag) -> Result<()> {
        check(
            unsafe { pam_sys::close_session(self.handle, flags) },
            "pam_close_session",
        )
    }

    pub fn set_item(&mut self, item: PamItemType, value: &str) -> Result<()> {
        check(
            unsafe { pam_sys::set_item(self.handle, item, value) },
            "pam_set_item",
        )
    }

    pub fn putenv(&mut self, name_value: &str) -> Result<()> {
        check(unsafe { pam_sys::putenv(self.handle, name_value) }, "pam_putenv")
    }

    pub fn getenvlist(&self) -> Result<Vec<String>> {
        Ok(unsafe { pam_sys::getenvlist(self.handle) })
    }

    pub fn get_user(&mut self) -> Result<String> {
        unsafe { pam_sys::get_user(self.handle, None) }
            .map_err(|_| Error::Pam("pam_get_user failed".to_string()))
    }

    pub fn end(mut self, status: PamReturnCode) {
        unsafe {
            pam_sys::end(self.handle, status as i32);
        }
        self.handle = ptr::null_mut();
    }
}

impl Drop for PamSession {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                pam_sys::end(self.handle, PamReturnCode::SUCCESS as i32);
            }
        }
    }
}

fn check(rc: PamReturnCode, what: &str) -> Result<()> {
    if rc == PamReturnCode::SUCCESS {
        Ok(())
    } else {
        Err(Error::Pam(format!("{} failed: {:?}", what, rc)))
    }
}

/// Outcome of `AuthSession::start()`. Exactly one of these is produced.
pub enum AuthOutcome {
    SessionCreated {
        username: String,
        envlist: Vec<String>,
        pam: PamSession,
    },
    AuthError(String),
    SessionError(String),
}

/// Drives a full PAM transaction as a single synchronous call rather than
/// a callback graph: `start()` runs authenticate -> acct_mgmt -> setcred
/// -> open_session and returns exactly one `AuthOutcome`. The caller
/// (`Session`, in `crate::session`) adapts this into the
/// session-created/auth-error/session-error notifications it emits to
/// its own observers, invoked synchronously on the same call stack as
/// `start()`, never from a signal handler.
pub struct AuthSession {
    service: String,
    username: Option<String>,
    password: String,
    extra_env: Vec<(String, String)>,
}

impl AuthSession {
    pub fn new(service: &str, username: Option<&str>, password: &str) -> AuthSession {
        AuthSession {
            service: service.to_string(),
            username: username.map(|s| s.to_string()),
            password: password.to_string(),
            extra_env: Vec::new(),
        }
    }

    pub fn put_env(&mut self, name: &str, value: &str) {
        self.extra_env.push((name.to_string(), value.to_string()));
    }

    pub fn start(&mut self) -> AuthOutcome {
        let conv: Pin<Box<dyn Converse>> = Box::pin(StaticConverse::new(self.password.clone()));
        let user_hint = self.username.as_deref().unwrap_or("");

        let mut pam = match PamSession::start(&self.service, user_hint, conv) {
            Ok(p) => p,
            Err(e) => return AuthOutcome::AuthError(e.to_string()),
        };

        for (name, value) in &self.extra_env {
            let _ = pam.putenv(&format!("{}={}", name, value));
        }

        if let Err(e) = pam.authenticate(PamFlag::NONE) {
            return AuthOutcome::AuthError(e.to_string());
        }
        if let Err(e) = pam.acct_mgmt(PamFlag::NONE) {
            return AuthOutcome::AuthError(e.to_string());
        }
        if let Err(e) = pam.setcred(PamFlag::ESTABLISH_CRED) {
            return AuthOutcome::SessionError(e.to_string());
        }
        if let Err(e) = pam.open_session(PamFlag::NONE) {
            return AuthOutcome::SessionError(e.to_string());
        }

        let username = match pam.get_user() {
            Ok(u) => u,
            Err(e) => return AuthOutcome::SessionError(e.to_string()),
        };
        let envlist = pam.getenvlist().unwrap_or_default();

        AuthOutcome::SessionCreated {
            username,
            envlist,
            pam,
        }
    }
}
