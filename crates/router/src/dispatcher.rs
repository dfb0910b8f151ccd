use crate::flow::{capture_and_respond, FlowContext, FlowRequest};
use crate::history::TraceLog;
use crate::loader::Handler;
use crate::parser::{CommandParser, CommandSignature, FlowArgs};
use crate::routines::{Routine, RoutineContext};
use crate::trie::{TriggerKind, TriggerTrie};
use crate::RouterError;
use common::channel::{Attachment, InboundMessage, MessageSource, Notifier};
use common::config::{DispatchConfig, ResponseStyle};
use common::response::{Reply, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum DispatchOutcome {
    Empty,
    General,
    Routine(TriggerKind),
    FlowSpawned(JoinHandle<()>),
    /// The message was answered with an error reply.
    Failed(RouterError),
}

/// Routes each inbound message to its handler and owns response delivery.
pub struct CommandMatrix {
    trie: Arc<TriggerTrie<Handler>>,
    parser: CommandParser,
    notifier: Arc<dyn Notifier>,
    flow_ctx: FlowContext,
    routine_ctx: RoutineContext,
    style: ResponseStyle,
}

impl CommandMatrix {
    pub fn new(
        trie: Arc<TriggerTrie<Handler>>,
        notifier: Arc<dyn Notifier>,
        dispatch: &DispatchConfig,
        routine_ctx: RoutineContext,
    ) -> Result<Self, RouterError> {
        let routine_names: Vec<String> = trie
            .enumerate_all()
            .into_iter()
            .filter(|entry| entry.kind != TriggerKind::Flow)
            .map(|entry| entry.trigger.clone())
            .collect();
        let parser = CommandParser::new(routine_names, dispatch.flow_prefix)?;
        Ok(Self {
            trie,
            parser,
            notifier,
            flow_ctx: FlowContext {
                traces: Arc::new(TraceLog::new(dispatch.trace_capacity)),
                flow_prefix: dispatch.flow_prefix,
            },
            routine_ctx,
            style: dispatch.response_style,
        })
    }

    pub fn trie(&self) -> &Arc<TriggerTrie<Handler>> {
        &self.trie
    }

    pub fn traces(&self) -> &Arc<TraceLog> {
        &self.flow_ctx.traces
    }

    pub fn routine_context(&self) -> &RoutineContext {
        &self.routine_ctx
    }

    pub fn style(&self) -> ResponseStyle {
        self.style
    }

    /// Handles one message. Errors never escape; they are answered and reported back
    /// as `DispatchOutcome::Failed`.
    pub async fn handle(&self, message: InboundMessage) -> DispatchOutcome {
        tracing::debug!("message from {}: {}", message.sender, message.text);
        match self.route(message).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("dispatch failed: {}", err);
                self.send(Response::error(err.to_string()).into(), &[])
                    .await;
                DispatchOutcome::Failed(err)
            }
        }
    }

    async fn route(&self, message: InboundMessage) -> Result<DispatchOutcome, RouterError> {
        match self.parser.parse(&message.text) {
            CommandSignature::Empty => {
                self.send(Response::warning("Got an Empty Message").into(), &[])
                    .await;
                Ok(DispatchOutcome::Empty)
            }
            CommandSignature::ParseError { message } => Err(RouterError::Parse(message)),
            CommandSignature::General { text } => {
                self.send(Response::general(format!("Got message {text}")).into(), &[])
                    .await;
                Ok(DispatchOutcome::General)
            }
            CommandSignature::Utility { command } => self.run_routine(&command).await,
            CommandSignature::Flow { command, args } => {
                self.spawn_flow(command, args, message.attachments)
            }
        }
    }

    async fn run_routine(&self, command: &str) -> Result<DispatchOutcome, RouterError> {
        let entry = self.trie.lookup(command)?;
        let Handler::Routine(routine) = &entry.handler else {
            return Err(RouterError::Dispatch(format!("{command} is not a routine")));
        };
        match entry.kind {
            TriggerKind::Power => {
                // Acknowledge first: the action may take the machine down with it.
                self.send(Response::warning(routine.message.clone()).into(), &[])
                    .await;
                self.invoke(routine.clone()).await?;
            }
            TriggerKind::Utility => {
                let output = self.invoke(routine.clone()).await?;
                self.send(
                    Response::info(format!("{}{}", routine.message, output)).into(),
                    &[],
                )
                .await;
            }
            TriggerKind::Flow => {
                return Err(RouterError::Dispatch(format!(
                    "{command} is registered as a flow"
                )))
            }
        }
        Ok(DispatchOutcome::Routine(entry.kind))
    }

    async fn invoke(&self, routine: Routine) -> Result<String, RouterError> {
        let ctx = self.routine_ctx.clone();
        let name = routine.name.clone();
        tokio::task::spawn_blocking(move || routine.invoke(&ctx))
            .await
            .map_err(|err| RouterError::Execution(format!("routine {name} aborted: {err}")))?
    }

    fn spawn_flow(
        &self,
        command: String,
        args: FlowArgs,
        attachments: Vec<Attachment>,
    ) -> Result<DispatchOutcome, RouterError> {
        let entry = self.trie.lookup(&command)?;
        let Handler::Flow(flow) = &entry.handler else {
            return Err(RouterError::Dispatch(format!("{command} is not a flow")));
        };
        tracing::info!("spawning flow {}", command);
        let task = tokio::spawn(capture_and_respond(
            flow.clone(),
            FlowRequest {
                trigger: command,
                args,
                attachments,
            },
            self.flow_ctx.clone(),
            self.notifier.clone(),
            self.style,
        ));
        Ok(DispatchOutcome::FlowSpawned(task))
    }

    pub async fn send(&self, reply: Reply, attachments: &[Attachment]) {
        if let Err(err) = self
            .notifier
            .send_message(&reply.render(self.style), attachments)
            .await
        {
            tracing::warn!("notifier send failed: {}", err);
        }
    }
}

/// Receives until the source closes or `shutdown` flips. Flows keep running detached.
pub async fn run_dispatch_loop<S>(
    source: &mut S,
    matrix: &CommandMatrix,
    mut shutdown: watch::Receiver<bool>,
) where
    S: MessageSource + ?Sized,
{
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            next = source.recv() => match next {
                Ok(Some(message)) => {
                    matrix.handle(message).await;
                }
                Ok(None) => {
                    tracing::info!("message source closed");
                    break;
                }
                Err(err) => {
                    tracing::warn!("message source failed: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }
}
