//! The conversation interface PAM calls back into, consumed by
//! `ffi::converse` to answer `PamMessageStyle` prompts without `unsafe`
//! leaking past the FFI boundary.

use crate::error::Result;

pub trait Converse {
    /// `PAM_PROMPT_ECHO_ON`: answer visible to the terminal.
    fn prompt_echo(&mut self, msg: &str) -> Result<String>;
    /// `PAM_PROMPT_ECHO_OFF`: answer hidden (passwords).
    fn prompt_blind(&mut self, msg: &str) -> Result<String>;
    /// `PAM_ERROR_MSG`.
    fn error(&mut self, msg: &str) -> Result<()>;
    /// `PAM_TEXT_INFO`.
    fn info(&mut self, msg: &str) -> Result<()>;
}

/// The only conversation style this core needs: the caller already has a
/// username and password in hand, so every blind prompt is answered with
/// the stored password and every other message is just logged.
pub struct StaticConverse {
    password: String,
}

impl StaticConverse {
    pub fn new(password: impl Into<String>) -> Self {
        StaticConverse {
            password: password.into(),
        }
    }
}

impl Converse for StaticConverse {
    fn prompt_echo(&mut self, msg: &str) -> Result<String> {
        crate::trace!("PAM prompt (echo): {}", msg);
        Ok(String::new())
    }

    fn prompt_blind(&mut self, msg: &str) -> Result<String> {
        crate::trace!("PAM prompt (blind): {}", msg);
        Ok(self.password.clone())
    }

    fn error(&mut self, msg: &str) -> Result<()> {
        crate::warn!("PAM error: {}", msg);
        Ok(())
    }

    fn info(&mut self, msg: &str) -> Result<()> {
        crate::trace!("PAM info: {}", msg);
        Ok(())
    }
}
