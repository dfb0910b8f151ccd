use crate::history::TraceLog;
use crate::parser::FlowArgs;
use common::channel::{Attachment, Notifier};
use common::config::ResponseStyle;
use common::response::{Reply, Response};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("flow error: {message}")]
pub struct FlowError {
    message: String,
}

impl FlowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Shared state handed to every flow execution.
#[derive(Clone, Debug)]
pub struct FlowContext {
    pub traces: Arc<TraceLog>,
    pub flow_prefix: char,
}

impl FlowContext {
    pub fn trigger_for(&self, name: &str) -> String {
        format!("{}{}", self.flow_prefix, name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlowReply {
    pub reply: Reply,
    pub attachments: Vec<Attachment>,
}

impl From<Reply> for FlowReply {
    fn from(reply: Reply) -> Self {
        Self {
            reply,
            attachments: Vec::new(),
        }
    }
}

/// A long-running command started with the flow prefix, e.g. `!locate`.
///
/// `execute` is synchronous and runs on the blocking pool; `respond` turns its outcome
/// into the message sent back to the owner.
pub trait Flow: Send + Sync {
    /// Trigger name without the flow prefix.
    fn name(&self) -> &str;

    fn summary(&self) -> &str;

    fn execute(
        &self,
        ctx: &FlowContext,
        args: FlowArgs,
        attachments: &[Attachment],
    ) -> Result<Value, FlowError>;

    fn respond(&self, outcome: &Result<Value, FlowError>) -> FlowReply {
        match outcome {
            Ok(value) => Reply::new()
                .with(Response::success(ANTICIPATION))
                .with(Response::general(
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
                ))
                .into(),
            Err(err) => unexpected_problem([("message", err.message().to_string())]).into(),
        }
    }
}

pub const ANTICIPATION: &str = "Your moment of anticipation is over. Here ya go!";

/// Error reply listing `fields` one per line.
pub fn unexpected_problem<I, K>(fields: I) -> Reply
where
    I: IntoIterator<Item = (K, String)>,
    K: std::fmt::Display,
{
    let mut text = "It appears we've encountered an unexpected problem!".to_string();
    for (key, value) in fields {
        text.push_str(&format!("\n{key}: {value}"));
    }
    Reply::from(Response::error(text))
}

pub struct FlowRequest {
    pub trigger: String,
    pub args: FlowArgs,
    pub attachments: Vec<Attachment>,
}

/// Acknowledges the request, runs the flow off the async runtime, records a trace and
/// sends the flow's own reply. Send failures are logged and otherwise ignored.
pub async fn capture_and_respond(
    flow: Arc<dyn Flow>,
    request: FlowRequest,
    ctx: FlowContext,
    notifier: Arc<dyn Notifier>,
    style: ResponseStyle,
) {
    let FlowRequest {
        trigger,
        args,
        attachments,
    } = request;
    let ack = Reply::from(Response::success(format!(
        "{trigger} request has been captured. Please wait!"
    )));
    if let Err(err) = notifier.send_message(&ack.render(style), &[]).await {
        tracing::warn!("{} acknowledgement failed: {}", trigger, err);
    }

    let worker = {
        let flow = flow.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || flow.execute(&ctx, args, &attachments))
    };
    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("flow {} aborted: {}", trigger, err);
            Err(FlowError::new(format!("{trigger} aborted unexpectedly")))
        }
    };

    match &outcome {
        Ok(value) => ctx.traces.record(&trigger, true, value.clone()),
        Err(err) => {
            tracing::info!("flow {} failed: {}", trigger, err);
            ctx.traces.record(
                &trigger,
                false,
                serde_json::json!({ "message": err.message() }),
            )
        }
    }

    let FlowReply { reply, attachments } = flow.respond(&outcome);
    if let Err(err) = notifier
        .send_message(&reply.render(style), &attachments)
        .await
    {
        tracing::warn!("{} response failed: {}", trigger, err);
    }
}
