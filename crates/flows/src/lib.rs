//! Flows shipped with the agent. `registry` is the only place they are listed.

mod locate;
mod ps;
mod rse;

pub use locate::FileLocator;
pub use ps::TraceInspector;
pub use rse::RemoteScriptExecution;

use remo::Remo;
use router::{Flow, FlowArgs, FlowError};
use serde_json::Value;
use std::sync::Arc;

pub fn registry(engine: Arc<Remo>) -> Vec<Arc<dyn Flow>> {
    vec![
        Arc::new(FileLocator),
        Arc::new(RemoteScriptExecution::new(engine)),
        Arc::new(TraceInspector),
    ]
}

pub(crate) fn required_str<'a>(args: &'a FlowArgs, key: &str) -> Result<&'a str, FlowError> {
    match args.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(FlowError::new(format!("missing argument: {key}")))
        }
        Some(other) => Err(FlowError::new(format!(
            "argument {key} must be a string, got {other}"
        ))),
    }
}

/// Renders a JSON value for a chat line; strings are shown without quotes.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
