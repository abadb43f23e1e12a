//! Operator commands: the key updates each one writes, the server-side policy
//! that accepts or rejects it, and the dispatch path that writes and logs it.

mod command;
mod dispatch;

pub use command::{Command, CommandKind, CommandPolicy, ControlGates, Rejection};
pub use dispatch::{DispatchReceipt, dispatch, submit};
