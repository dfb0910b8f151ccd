use crate::{display_value, required_str};
use common::channel::Attachment;
use common::response::{Reply, Response};
use router::flow::unexpected_problem;
use router::{Flow, FlowArgs, FlowContext, FlowError, FlowReply, TraceEntry};
use serde_json::{json, Value};

/// `!ps`: lists the traces recorded for another flow, or clears them with `purge: true`.
pub struct TraceInspector;

fn stamp(at_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(at_ms as i64)
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| at_ms.to_string())
}

impl Flow for TraceInspector {
    fn name(&self) -> &str {
        "ps"
    }

    fn summary(&self) -> &str {
        "Shows or purges recorded flow traces. Args: trigger, purge (optional bool)"
    }

    fn execute(
        &self,
        ctx: &FlowContext,
        args: FlowArgs,
        _: &[Attachment],
    ) -> Result<Value, FlowError> {
        let raw = required_str(&args, "trigger")?;
        let trigger = if raw.starts_with(ctx.flow_prefix) {
            raw.to_string()
        } else {
            ctx.trigger_for(raw)
        };
        let purge = match args.get("purge") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(purge)) => *purge,
            Some(other) => {
                return Err(FlowError::new(format!(
                    "purge must be true or false, got {other}"
                )))
            }
        };
        if purge {
            let purged = ctx.traces.purge(&trigger);
            tracing::info!("purged {} traces for {}", purged, trigger);
            return Ok(json!({ "trigger": trigger, "purged": purged }));
        }
        Ok(json!({ "trigger": trigger, "traces": ctx.traces.entries_for(&trigger) }))
    }

    fn respond(&self, outcome: &Result<Value, FlowError>) -> FlowReply {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                return unexpected_problem([("message", err.message().to_string())]).into()
            }
        };
        let trigger = value["trigger"].as_str().unwrap_or_default();
        if let Some(purged) = value["purged"].as_u64() {
            return Reply::from(Response::success(format!(
                "Purged {purged} traces for {trigger}"
            )))
            .into();
        }
        let entries: Vec<TraceEntry> =
            serde_json::from_value(value["traces"].clone()).unwrap_or_default();
        if entries.is_empty() {
            return Reply::from(Response::info(format!("No traces recorded for {trigger}"))).into();
        }
        let lines = entries
            .iter()
            .map(|entry| {
                format!(
                    "[{}] {} {}",
                    stamp(entry.at_ms),
                    if entry.ok { "ok" } else { "failed" },
                    display_value(&entry.result)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Reply::new()
            .with(Response::info(format!(
                "{} traces for {trigger}:",
                entries.len()
            )))
            .with(Response::general(lines))
            .into()
    }
}
