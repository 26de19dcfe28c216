//! Shared data contracts for the student code runner.
//!
//! Everything in here is plain data: the structured output model returned to
//! callers, the per-call execution limits, and the message protocol spoken
//! between the runner service and its language workers.

pub mod limits;
pub mod messages;
pub mod output;

pub use limits::*;
pub use messages::*;
pub use output::*;
