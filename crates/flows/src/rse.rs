use crate::display_value;
use common::channel::Attachment;
use common::response::{Reply, Response};
use remo::{ExecutionResult, JobRequest, Remo};
use router::flow::{unexpected_problem, ANTICIPATION};
use router::{Flow, FlowArgs, FlowContext, FlowError, FlowReply};
use serde_json::Value;
use std::sync::Arc;

const TEXT_ARGS: [&str; 5] = ["lang", "source", "stdin", "source_file_name", "path"];
const LIMIT_ARGS: [&str; 2] = ["time_limit", "memory_limit"];

/// Chat arguments are JSON-decoded, so `stdin=7` arrives as a number and
/// `memory_limit=65536.0` as a float. Text fields take any scalar; limits take
/// integral numbers or numeric strings.
fn normalize_args(args: &mut FlowArgs) {
    for key in TEXT_ARGS {
        let Some(value) = args.get_mut(key) else {
            continue;
        };
        match value {
            Value::Number(number) => *value = Value::String(number.to_string()),
            Value::Bool(flag) => *value = Value::String(flag.to_string()),
            _ => {}
        }
    }
    for key in LIMIT_ARGS {
        let Some(value) = args.get_mut(key) else {
            continue;
        };
        let whole = match value {
            Value::Number(number) if number.as_u64().is_none() => number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && *float >= 0.0 && *float <= u64::MAX as f64)
                .map(|float| float as u64),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        if let Some(whole) = whole {
            *value = Value::from(whole);
        }
    }
}

/// `!rse`: runs a snippet through the execution engine. A message attachment, when
/// present, replaces the `source` argument.
pub struct RemoteScriptExecution {
    engine: Arc<Remo>,
}

impl RemoteScriptExecution {
    pub fn new(engine: Arc<Remo>) -> Self {
        Self { engine }
    }
}

impl Flow for RemoteScriptExecution {
    fn name(&self) -> &str {
        "rse"
    }

    fn summary(&self) -> &str {
        "Runs a script on this machine. Args: lang, source, stdin, time_limit, \
         memory_limit, path, source_file_name"
    }

    fn execute(
        &self,
        _: &FlowContext,
        mut args: FlowArgs,
        attachments: &[Attachment],
    ) -> Result<Value, FlowError> {
        if let Some(attachment) = attachments.first() {
            let source = String::from_utf8_lossy(&attachment.bytes).to_string();
            args.insert("source".to_string(), Value::String(source));
        }
        normalize_args(&mut args);
        let request: JobRequest = serde_json::from_value(Value::Object(args))
            .map_err(|err| FlowError::new(format!("invalid rse arguments: {err}")))?;
        let result = self.engine.run_request(request);
        serde_json::to_value(&result)
            .map_err(|err| FlowError::new(format!("result encode failed: {err}")))
    }

    fn respond(&self, outcome: &Result<Value, FlowError>) -> FlowReply {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                return unexpected_problem([("message", err.message().to_string())]).into()
            }
        };
        match serde_json::from_value::<ExecutionResult>(value.clone()) {
            Ok(result) if result.is_success() => {
                let run_log = result.run_log.unwrap_or_default();
                FlowReply {
                    reply: Reply::from(Response::success(ANTICIPATION)),
                    attachments: vec![
                        Attachment::text("stdout", &run_log.stdout),
                        Attachment::text("stderr", &run_log.stderr),
                    ],
                }
            }
            _ => {
                let fields = value
                    .as_object()
                    .map(|object| {
                        object
                            .iter()
                            .map(|(key, field)| (key.clone(), display_value(field)))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                unexpected_problem(fields).into()
            }
        }
    }
}
