//! # Domain Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Event`] | A tracked feed event |
//! | [`EventKind`] | Allow-listed event types |
//! | [`UtcDateTime`] | UTC timestamp |

mod event;
mod timestamp;

pub use event::{Event, EventKind};
pub use timestamp::UtcDateTime;
