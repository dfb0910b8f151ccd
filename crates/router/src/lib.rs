//! Command routing: a trigger trie built once at startup, a parser that classifies
//! chat text, and the dispatcher tying them to routines and flows.

mod dispatcher;
mod error;
pub mod flow;
mod history;
mod loader;
mod parser;
pub mod routines;
mod trie;

pub use dispatcher::{run_dispatch_loop, CommandMatrix, DispatchOutcome};
pub use error::RouterError;
pub use flow::{capture_and_respond, Flow, FlowContext, FlowError, FlowReply, FlowRequest};
pub use history::{TraceEntry, TraceLog};
pub use loader::{Handler, HandlerCatalog, TriggerLoader};
pub use parser::{CommandParser, CommandSignature, FlowArgs};
pub use routines::{Routine, RoutineContext};
pub use trie::{TriggerEntry, TriggerKind, TriggerNode, TriggerTrie};
