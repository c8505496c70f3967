mod converse;
mod ffi;
mod session;

pub use converse::{Converse, StaticConverse};
pub use session::{AuthOutcome, AuthSession, PamSession};
