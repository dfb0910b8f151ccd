use crate::flow::Flow;
use crate::routines::{self, Routine};
use crate::trie::{TriggerKind, TriggerTrie};
use crate::RouterError;
use common::config::RoutineTables;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub enum Handler {
    Flow(Arc<dyn Flow>),
    Routine(Routine),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flow(flow) => write!(f, "Flow({})", flow.name()),
            Self::Routine(routine) => write!(f, "Routine({})", routine.callable),
        }
    }
}

/// Everything that can be addressed by a trigger.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    pub flows: Vec<Arc<dyn Flow>>,
    pub routines: Vec<Routine>,
}

impl HandlerCatalog {
    pub fn new(flows: Vec<Arc<dyn Flow>>, routines: Vec<Routine>) -> Self {
        Self { flows, routines }
    }

    pub fn from_config(
        flows: Vec<Arc<dyn Flow>>,
        tables: &RoutineTables,
    ) -> Result<Self, RouterError> {
        Ok(Self::new(flows, routines::from_config(tables)?))
    }
}

pub struct TriggerLoader;

impl TriggerLoader {
    /// Registers every catalog entry from scoped worker threads, then freezes the trie.
    /// The first failure (duplicate or empty trigger) aborts the build.
    pub fn build(
        catalog: &HandlerCatalog,
        flow_prefix: char,
    ) -> Result<Arc<TriggerTrie<Handler>>, RouterError> {
        let mut pending = Vec::with_capacity(catalog.flows.len() + catalog.routines.len());
        for flow in &catalog.flows {
            if flow.name().is_empty() {
                return Err(RouterError::Configuration(
                    "flow registered without a name".to_string(),
                ));
            }
            pending.push((
                format!("{flow_prefix}{}", flow.name()),
                Handler::Flow(flow.clone()),
                TriggerKind::Flow,
            ));
        }
        for routine in &catalog.routines {
            pending.push((
                routine.name.clone(),
                Handler::Routine(routine.clone()),
                routine.kind,
            ));
        }

        let trie = Mutex::new(TriggerTrie::new());
        let outcomes: Vec<Result<(), RouterError>> = std::thread::scope(|scope| {
            let workers: Vec<_> = pending
                .into_iter()
                .map(|(trigger, handler, kind)| {
                    let trie = &trie;
                    scope.spawn(move || {
                        trie.lock()
                            .map_err(|_| {
                                RouterError::Configuration("trigger trie lock poisoned".to_string())
                            })?
                            .register(&trigger, handler, kind)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker.join().unwrap_or_else(|_| {
                        Err(RouterError::Configuration(
                            "trigger registration panicked".to_string(),
                        ))
                    })
                })
                .collect()
        });
        outcomes.into_iter().collect::<Result<Vec<()>, _>>()?;

        let trie = trie
            .into_inner()
            .map_err(|_| RouterError::Configuration("trigger trie lock poisoned".to_string()))?;
        tracing::info!("trigger trie ready with {} triggers", trie.len());
        Ok(Arc::new(trie))
    }
}
