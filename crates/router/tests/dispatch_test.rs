use common::channel::{
    local_source, Attachment, InboundMessage, RecordingNotifier, SenderIdentity,
};
use common::config::{DispatchConfig, ResponseStyle};
use router::{
    run_dispatch_loop, CommandMatrix, DispatchOutcome, Flow, FlowArgs, FlowContext, FlowError,
    HandlerCatalog, Routine, RoutineContext, RouterError, TriggerKind, TriggerLoader,
};
use serde_json::{json, Value};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct EchoFlow;

impl Flow for EchoFlow {
    fn name(&self) -> &str {
        "echo"
    }

    fn summary(&self) -> &str {
        "Returns its arguments"
    }

    fn execute(
        &self,
        _: &FlowContext,
        args: FlowArgs,
        attachments: &[Attachment],
    ) -> Result<Value, FlowError> {
        if args.contains_key("fail") {
            return Err(FlowError::new("asked to fail"));
        }
        Ok(json!({ "args": args, "attachments": attachments.len() }))
    }
}

/// Holds its worker until the test releases it.
struct GateFlow {
    release: Mutex<Receiver<()>>,
}

impl Flow for GateFlow {
    fn name(&self) -> &str {
        "gate"
    }

    fn summary(&self) -> &str {
        "Waits for the test to open the gate"
    }

    fn execute(&self, _: &FlowContext, _: FlowArgs, _: &[Attachment]) -> Result<Value, FlowError> {
        let release = self
            .release
            .lock()
            .map_err(|_| FlowError::new("gate poisoned"))?;
        release
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| FlowError::new("gate never opened"))?;
        Ok(json!({ "opened": true }))
    }
}

async fn wait_for_text(notifier: &RecordingNotifier, prefix: &str) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !notifier.texts().iter().any(|text| text.starts_with(prefix)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

fn routine<F>(name: &str, kind: TriggerKind, message: &str, run: F) -> Routine
where
    F: Fn(&RoutineContext) -> Result<String, RouterError> + Send + Sync + 'static,
{
    Routine::new(name, name, message, kind, Arc::new(run))
}

fn message(text: &str) -> InboundMessage {
    InboundMessage::text(SenderIdentity::new("test", "owner"), text)
}

fn matrix_with(routines: Vec<Routine>, notifier: Arc<RecordingNotifier>) -> CommandMatrix {
    let flows: Vec<Arc<dyn Flow>> = vec![Arc::new(EchoFlow)];
    let trie = TriggerLoader::build(&HandlerCatalog::new(flows, routines), '!').expect("trie");
    let dispatch = DispatchConfig {
        response_style: ResponseStyle::Plain,
        ..DispatchConfig::default()
    };
    CommandMatrix::new(trie, notifier, &dispatch, RoutineContext::default()).expect("matrix")
}

fn matrix(notifier: Arc<RecordingNotifier>) -> CommandMatrix {
    let answer = routine("answer", TriggerKind::Utility, "Answer: ", |_| {
        Ok("42".to_string())
    });
    matrix_with(vec![answer], notifier)
}

#[tokio::test]
async fn general_and_empty_messages_are_acknowledged() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());

    assert!(matches!(
        matrix.handle(message("hello there")).await,
        DispatchOutcome::General
    ));
    assert!(matches!(
        matrix.handle(message("   ")).await,
        DispatchOutcome::Empty
    ));
    assert_eq!(
        notifier.texts(),
        vec![
            "Got message hello there".to_string(),
            "warning: Got an Empty Message".to_string()
        ]
    );
}

#[tokio::test]
async fn utility_result_is_appended_to_routine_message() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());
    let outcome = matrix.handle(message("answer")).await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Routine(TriggerKind::Utility)
    ));
    assert_eq!(notifier.texts(), vec!["Answer: 42".to_string()]);
}

#[tokio::test]
async fn power_routine_is_acknowledged_before_it_runs() {
    let notifier = Arc::new(RecordingNotifier::new());
    let observed = notifier.clone();
    let power = routine("halt", TriggerKind::Power, "Halting now", move |_| {
        if observed.texts().iter().any(|text| text.contains("Halting now")) {
            Ok(String::new())
        } else {
            Err(RouterError::Execution("ran before acknowledgement".to_string()))
        }
    });
    let matrix = matrix_with(vec![power], notifier.clone());

    let outcome = matrix.handle(message("halt")).await;
    assert!(
        matches!(outcome, DispatchOutcome::Routine(TriggerKind::Power)),
        "{outcome:?}"
    );
    assert_eq!(notifier.texts(), vec!["warning: Halting now".to_string()]);
}

#[tokio::test]
async fn panicking_routine_is_contained() {
    let notifier = Arc::new(RecordingNotifier::new());
    let boom = routine("boom", TriggerKind::Utility, "", |_| panic!("routine blew up"));
    let matrix = matrix_with(vec![boom], notifier.clone());

    assert!(matches!(
        matrix.handle(message("boom")).await,
        DispatchOutcome::Failed(RouterError::Execution(_))
    ));
    assert!(matches!(
        matrix.handle(message("still alive")).await,
        DispatchOutcome::General
    ));
    let texts = notifier.texts();
    assert!(texts[0].starts_with("error: execution error: routine boom aborted"));
    assert_eq!(texts[1], "Got message still alive");
}

#[tokio::test]
async fn parse_errors_and_unknown_flows_are_reported() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());

    assert!(matches!(
        matrix.handle(message("!echo {bad json")).await,
        DispatchOutcome::Failed(RouterError::Parse(_))
    ));
    assert!(matches!(
        matrix.handle(message("!missing a=1")).await,
        DispatchOutcome::Failed(RouterError::NotFound(_))
    ));
    let texts = notifier.texts();
    assert!(texts[0].starts_with("error: parse error: invalid json arguments"));
    assert_eq!(texts[1], "error: trigger not found: !missing");
}

#[tokio::test]
async fn flow_acknowledges_then_responds_and_records_trace() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());

    match matrix.handle(message("!echo path=/tmp\ncount=2")).await {
        DispatchOutcome::FlowSpawned(task) => task.await.expect("flow task"),
        other => panic!("expected flow to spawn, got {other:?}"),
    }

    let texts = notifier.texts();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "!echo request has been captured. Please wait!");
    assert!(texts[1].starts_with("Your moment of anticipation is over. Here ya go!"));
    assert!(texts[1].contains("\"/tmp\""));

    let traces = matrix.traces().entries_for("!echo");
    assert_eq!(traces.len(), 1);
    assert!(traces[0].ok);
    assert_eq!(traces[0].result["args"]["count"], json!(2));
}

#[tokio::test]
async fn failing_flow_lists_the_problem() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());

    let DispatchOutcome::FlowSpawned(task) = matrix.handle(message("!echo fail=true")).await
    else {
        panic!("expected flow to spawn");
    };
    task.await.expect("flow task");

    let texts = notifier.texts();
    assert_eq!(
        texts[1],
        "error: It appears we've encountered an unexpected problem!\nmessage: asked to fail"
    );
    assert!(!matrix.traces().entries_for("!echo")[0].ok);
}

#[tokio::test]
async fn dispatch_loop_drains_source_until_closed() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());
    let (tx, mut source) = local_source(8);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tx.send(message("one")).await.expect("send one");
    tx.send(message("answer")).await.expect("send answer");
    drop(tx);

    run_dispatch_loop(&mut source, &matrix, shutdown_rx).await;
    assert_eq!(
        notifier.texts(),
        vec!["Got message one".to_string(), "Answer: 42".to_string()]
    );
}

#[tokio::test]
async fn dispatch_loop_stops_on_shutdown() {
    let notifier = Arc::new(RecordingNotifier::new());
    let matrix = matrix(notifier.clone());
    let (_tx, mut source) = local_source(1);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let stop = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(true);
    });
    run_dispatch_loop(&mut source, &matrix, shutdown_rx).await;
    stop.await.expect("stop task");
    assert!(notifier.texts().is_empty());
}

#[tokio::test]
async fn utility_reply_is_not_held_up_by_running_flow() {
    let notifier = Arc::new(RecordingNotifier::new());
    let (release_tx, release_rx) = channel();
    let flows: Vec<Arc<dyn Flow>> = vec![Arc::new(GateFlow {
        release: Mutex::new(release_rx),
    })];
    let answer = routine("answer", TriggerKind::Utility, "Answer: ", |_| {
        Ok("42".to_string())
    });
    let trie = TriggerLoader::build(&HandlerCatalog::new(flows, vec![answer]), '!').expect("trie");
    let dispatch = DispatchConfig {
        response_style: ResponseStyle::Plain,
        ..DispatchConfig::default()
    };
    let matrix = CommandMatrix::new(trie, notifier.clone(), &dispatch, RoutineContext::default())
        .expect("matrix");

    let (tx, mut source) = local_source(8);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tx.send(message("!gate")).await.expect("send flow");
    tx.send(message("answer")).await.expect("send utility");

    let observer = async {
        assert!(
            wait_for_text(&notifier, "Answer: 42").await,
            "utility reply did not arrive while flow was blocked: {:?}",
            notifier.texts()
        );
        assert!(!notifier
            .texts()
            .iter()
            .any(|text| text.starts_with("Your moment of anticipation")));

        release_tx.send(()).expect("open gate");
        assert!(
            wait_for_text(&notifier, "Your moment of anticipation is over").await,
            "flow never answered: {:?}",
            notifier.texts()
        );
        let _ = shutdown_tx.send(true);
    };
    tokio::join!(run_dispatch_loop(&mut source, &matrix, shutdown_rx), observer);

    let texts = notifier.texts();
    assert_eq!(texts.len(), 3);
    assert!(texts.contains(&"!gate request has been captured. Please wait!".to_string()));
    assert!(matrix.traces().entries_for("!gate")[0].ok);
}
