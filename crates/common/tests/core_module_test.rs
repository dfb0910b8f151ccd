use common::channel::{
    local_source, Attachment, InboundMessage, MessageSource, Notifier, RecordingNotifier,
    SenderIdentity,
};
use common::config::{AgentConfig, ChannelKind, ResponseStyle};
use common::response::{Reply, Response};

#[tokio::test]
async fn local_source_delivers_in_order_then_closes() {
    let (tx, mut source) = local_source(4);
    let sender = SenderIdentity::new("console", "owner");
    for text in ["time", "!ps trigger=rse"] {
        if let Err(err) = tx.send(InboundMessage::text(sender.clone(), text)).await {
            panic!("send failed: {err}");
        }
    }
    drop(tx);

    let first = match source.recv().await {
        Ok(Some(message)) => message,
        other => panic!("expected a message, got {other:?}"),
    };
    assert_eq!(first.text, "time");
    assert_eq!(first.sender.to_string(), "console:owner");
    let second = match source.recv().await {
        Ok(Some(message)) => message,
        other => panic!("expected a message, got {other:?}"),
    };
    assert_eq!(second.text, "!ps trigger=rse");
    assert!(matches!(source.recv().await, Ok(None)));
}

#[tokio::test]
async fn recording_notifier_keeps_rendered_replies() {
    let notifier = RecordingNotifier::new();
    let reply = Reply::new()
        .with(Response::info("Files found:"))
        .with(Response::warning("2 skipped"));
    let sent = notifier
        .send_message(
            &reply.render(ResponseStyle::Plain),
            &[Attachment::text("stdout", "ok")],
        )
        .await;
    assert!(sent.is_ok());

    let messages = notifier.sent();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Files found:\nwarning: 2 skipped");
    assert_eq!(messages[0].attachments[0].bytes, b"ok".to_vec());
}

#[test]
fn config_file_on_disk_selects_telegram() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("tempdir failed: {err}"),
    };
    let path = dir.path().join("jarvis.toml");
    let raw = r#"
[setup]
greeting = "Morning"
comment = "All systems nominal"

[channel]
kind = "telegram"

[channel.telegram]
owner_chat_id = 4242
"#;
    if let Err(err) = std::fs::write(&path, raw) {
        panic!("write failed: {err}");
    }

    let config = match AgentConfig::load(&path) {
        Ok(config) => config,
        Err(err) => panic!("load failed: {err}"),
    };
    assert_eq!(config.setup.greeting, "Morning");
    assert_eq!(config.channel.kind, ChannelKind::Telegram);
    assert_eq!(config.channel.telegram.owner_chat_id, Some(4242));
    assert_eq!(config.channel.telegram.poll_timeout_seconds, 30);
}
