use super::{TriggerKind, TriggerTrie};
use crate::RouterError;

#[test]
fn registered_triggers_resolve_to_their_handler() {
    let mut trie = TriggerTrie::new();
    trie.register("time", 1, TriggerKind::Utility)
        .expect("register time");
    trie.register("timer", 2, TriggerKind::Utility)
        .expect("register timer");
    trie.register("!locate", 3, TriggerKind::Flow)
        .expect("register locate");

    let time = trie.lookup("time").expect("lookup time");
    assert_eq!(time.handler, 1);
    assert_eq!(time.kind, TriggerKind::Utility);
    assert_eq!(trie.lookup("timer").expect("lookup timer").handler, 2);
    let locate = trie.lookup("!locate").expect("lookup locate");
    assert_eq!((locate.handler, locate.kind), (3, TriggerKind::Flow));
}

#[test]
fn duplicate_registration_keeps_first_handler() {
    let mut trie = TriggerTrie::new();
    trie.register("restart", "first", TriggerKind::Power)
        .expect("register restart");
    match trie.register("restart", "second", TriggerKind::Utility) {
        Err(RouterError::Configuration(message)) => assert!(message.contains("restart")),
        other => panic!("expected configuration error, got {other:?}"),
    }
    let entry = trie.lookup("restart").expect("lookup restart");
    assert_eq!(entry.handler, "first");
    assert_eq!(entry.kind, TriggerKind::Power);
    assert_eq!(trie.len(), 1);
}

#[test]
fn prefixes_and_unknown_triggers_are_not_found() {
    let mut trie = TriggerTrie::new();
    trie.register("uptime", (), TriggerKind::Utility)
        .expect("register uptime");
    assert!(matches!(trie.lookup("up"), Err(RouterError::NotFound(_))));
    assert!(matches!(trie.lookup("uptimes"), Err(RouterError::NotFound(_))));
    assert!(matches!(trie.lookup("pwd"), Err(RouterError::NotFound(_))));
}

#[test]
fn enumerate_all_visits_breadth_first_once_each() {
    let mut trie = TriggerTrie::new();
    for (index, trigger) in ["pwd", "ip", "!rse", "!ps", "p"].iter().enumerate() {
        trie.register(trigger, index, TriggerKind::Utility)
            .expect("register");
    }
    let triggers: Vec<&str> = trie
        .enumerate_all()
        .into_iter()
        .map(|entry| entry.trigger.as_str())
        .collect();
    assert_eq!(triggers, vec!["p", "ip", "pwd", "!ps", "!rse"]);
    assert_eq!(trie.enumerate_all().len(), trie.len());
}

#[test]
fn empty_trigger_is_rejected() {
    let mut trie = TriggerTrie::new();
    assert!(trie.register("", (), TriggerKind::Flow).is_err());
    assert!(trie.is_empty());
}
