use crate::RouterError;
use indexmap::IndexMap;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Flow,
    Utility,
    Power,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flow => "flow",
            Self::Utility => "utility",
            Self::Power => "power",
        })
    }
}

/// What a terminal node holds for its registered trigger.
#[derive(Debug)]
pub struct TriggerEntry<H> {
    pub trigger: String,
    pub handler: H,
    pub kind: TriggerKind,
}

#[derive(Debug)]
pub struct TriggerNode<H> {
    children: IndexMap<char, TriggerNode<H>>,
    entry: Option<TriggerEntry<H>>,
}

impl<H> Default for TriggerNode<H> {
    fn default() -> Self {
        Self {
            children: IndexMap::new(),
            entry: None,
        }
    }
}

impl<H> TriggerNode<H> {
    pub fn entry(&self) -> Option<&TriggerEntry<H>> {
        self.entry.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = (&char, &TriggerNode<H>)> {
        self.children.iter()
    }
}

/// Prefix trie keyed by trigger characters. Children keep insertion order, so
/// enumeration is deterministic for a given registration order.
#[derive(Debug)]
pub struct TriggerTrie<H> {
    root: TriggerNode<H>,
    len: usize,
}

impl<H> Default for TriggerTrie<H> {
    fn default() -> Self {
        Self {
            root: TriggerNode::default(),
            len: 0,
        }
    }
}

impl<H> TriggerTrie<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `trigger`. A trigger that already has a handler is rejected and keeps
    /// its first registration.
    pub fn register(
        &mut self,
        trigger: &str,
        handler: H,
        kind: TriggerKind,
    ) -> Result<(), RouterError> {
        if trigger.is_empty() {
            return Err(RouterError::Configuration(
                "cannot register an empty trigger".to_string(),
            ));
        }
        let mut node = &mut self.root;
        for ch in trigger.chars() {
            node = node.children.entry(ch).or_default();
        }
        if node.entry.is_some() {
            return Err(RouterError::Configuration(format!(
                "duplicate trigger: {trigger}"
            )));
        }
        node.entry = Some(TriggerEntry {
            trigger: trigger.to_string(),
            handler,
            kind,
        });
        self.len += 1;
        tracing::debug!("registered {} trigger {}", kind, trigger);
        Ok(())
    }

    pub fn lookup(&self, trigger: &str) -> Result<&TriggerEntry<H>, RouterError> {
        let mut node = &self.root;
        for ch in trigger.chars() {
            node = node
                .children
                .get(&ch)
                .ok_or_else(|| RouterError::NotFound(trigger.to_string()))?;
        }
        node.entry
            .as_ref()
            .ok_or_else(|| RouterError::NotFound(trigger.to_string()))
    }

    /// Every registered trigger once, breadth-first from the root.
    pub fn enumerate_all(&self) -> Vec<&TriggerEntry<H>> {
        let mut found = Vec::with_capacity(self.len);
        let mut queue = VecDeque::from([&self.root]);
        while let Some(node) = queue.pop_front() {
            if let Some(entry) = &node.entry {
                found.push(entry);
            }
            queue.extend(node.children.values());
        }
        found
    }
}

#[cfg(test)]
#[path = "trie_test.rs"]
mod trie_test;
