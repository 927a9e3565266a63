//! Call sessions and the table that owns them

pub mod call;
pub mod table;

pub use call::{CallRef, CallSession, CallState, Direction, DEFAULT_RETRY_TIME};
pub use table::{DestroyOutcome, FindMode, Released, SessionTable};
