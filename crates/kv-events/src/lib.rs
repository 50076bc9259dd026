//! Pattern-subscribed event dispatch over storage writes

pub mod dispatcher;
pub mod error;
pub mod pattern;

pub use dispatcher::{Dispatcher, Event};
pub use error::{Error, Result};
pub use pattern::Pattern;
