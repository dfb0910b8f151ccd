mod console;
mod daemon;
mod telegram;

use common::channel::{MessageSource, Notifier};
use common::config::{config_path, AgentConfig, ChannelKind};
use common::logging::init_logging;
use common::response::{Reply, Response};
use daemon::{default_pid_file, spawn_daemon_child, stop_daemon, CliArgs, PidFileGuard};
use remo::Remo;
use router::{
    run_dispatch_loop, CommandMatrix, Handler, HandlerCatalog, RoutineContext, TriggerKind,
    TriggerLoader,
};
use std::sync::Arc;
use telegram::{TelegramClient, TelegramNotifier, TelegramSettings, TelegramSource};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), JarvisError> {
    let cli = CliArgs::parse()?;

    if cli.stop {
        let pid_file = match &cli.pid_file {
            Some(path) => path.clone(),
            None => default_pid_file()?,
        };
        return stop_daemon(&pid_file);
    }
    if cli.should_spawn_daemon() {
        return spawn_daemon_child(&cli);
    }

    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_path().map_err(|err| JarvisError::new(err.to_string()))?,
    };
    let config = AgentConfig::load(&path)
        .map_err(|err| JarvisError::new(format!("{}: {err}", path.display())))?;
    let logging = init_logging(&config.logging)
        .map_err(|err| JarvisError::new(err.to_string()))?;
    tracing::info!("jarvisd starting with config {}", path.display());

    let _pid_guard = if cli.daemon_child {
        let pid_file = match &cli.pid_file {
            Some(path) => path.clone(),
            None => default_pid_file()?,
        };
        Some(PidFileGuard::create(pid_file)?)
    } else {
        None
    };

    let engine = Arc::new(Remo::new(&config.sandbox));
    let catalog = HandlerCatalog::from_config(flows::registry(engine), &config.routines)
        .map_err(|err| JarvisError::new(err.to_string()))?;
    let trie = TriggerLoader::build(&catalog, config.dispatch.flow_prefix).map_err(|err| {
        tracing::error!("trigger registration failed: {}", err);
        JarvisError::new(err.to_string())
    })?;
    tracing::info!("registered {} triggers", trie.len());

    if cli.list_triggers {
        for entry in trie.enumerate_all() {
            println!("{:<24} {}", entry.trigger, entry.kind);
        }
        return Ok(());
    }

    let (notifier, mut source) = open_channel(&cli, &config)?;
    let routine_ctx = RoutineContext {
        log_file: logging.log_file_path(),
    };
    let matrix = CommandMatrix::new(trie, notifier, &config.dispatch, routine_ctx)
        .map_err(|err| JarvisError::new(err.to_string()))?;

    send_welcome(&config, &matrix).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    run_dispatch_loop(&mut *source, &matrix, shutdown_rx).await;
    tracing::info!("jarvisd stopped");
    Ok(())
}

type Channel = (Arc<dyn Notifier>, Box<dyn MessageSource>);

fn open_channel(cli: &CliArgs, config: &AgentConfig) -> Result<Channel, JarvisError> {
    match cli.channel(config.channel.kind) {
        ChannelKind::Console => {
            tracing::info!("using console channel");
            let notifier: Arc<dyn Notifier> = Arc::new(console::ConsoleNotifier::new());
            let source: Box<dyn MessageSource> = Box::new(console::console_source());
            Ok((notifier, source))
        }
        ChannelKind::Telegram => {
            let settings = TelegramSettings::from_config(&config.channel.telegram)?;
            let client = TelegramClient::new(settings.bot_token.clone());
            let notifier = TelegramNotifier::new(client.clone(), settings.owner_chat_id);
            let source = TelegramSource::new(client, settings)?;
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            let source: Box<dyn MessageSource> = Box::new(source);
            Ok((notifier, source))
        }
    }
}

/// Greeting, comment, every utility routine's current reading and the trigger list.
async fn send_welcome(config: &AgentConfig, matrix: &CommandMatrix) {
    let mut readings = Vec::new();
    let mut triggers = Vec::new();
    for entry in matrix.trie().enumerate_all() {
        triggers.push(format!("{} ({})", entry.trigger, entry.kind));
        let Handler::Routine(routine) = &entry.handler else {
            continue;
        };
        if entry.kind != TriggerKind::Utility {
            continue;
        }
        let routine = routine.clone();
        let ctx = matrix.routine_context().clone();
        let reading = tokio::task::spawn_blocking(move || {
            routine
                .invoke(&ctx)
                .map(|output| format!("{}{}", routine.message, output))
        })
        .await;
        match reading {
            Ok(Ok(line)) => readings.push(line),
            Ok(Err(err)) => tracing::warn!("welcome routine {} failed: {}", entry.trigger, err),
            Err(err) => tracing::warn!("welcome routine {} aborted: {}", entry.trigger, err),
        }
    }

    let mut reply = Reply::new()
        .with(Response::success(format!("{}\n", config.setup.greeting)))
        .with(Response::info(format!("{}\n", config.setup.comment)));
    if !readings.is_empty() {
        reply.push(Response::general(readings.join("\n")));
    }
    reply.push(Response::info(format!(
        "Registered triggers:\n{}",
        triggers.join("\n")
    )));
    matrix.send(reply, &[]).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            tracing::warn!("sigterm handler install failed: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[derive(Debug, thiserror::Error)]
#[error("jarvisd error: {message}")]
pub struct JarvisError {
    message: String,
}

impl JarvisError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
