pub mod log;

pub mod config;
pub mod error;
pub mod ini;
pub mod pam;
pub mod reaper;
pub mod seat;
pub mod session;
pub mod tokenize;

pub use config::Config;
pub use error::{Error, Result};
pub use seat::{Seat, SeatObserver};
pub use session::Session;
