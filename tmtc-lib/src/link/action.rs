use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Clears the link data counters.
pub const RESET_COUNTERS: &str = "reset-counters";
/// Closes and re-opens the connection of a stream link.
pub const RECONNECT: &str = "reconnect";

pub type ActionHandler = Box<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Operator actions exposed by a link, keyed by id.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<BTreeMap<String, ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.ids())
            .finish()
    }
}

impl ActionRegistry {
    pub(crate) fn with_action<F>(id: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let mut actions: BTreeMap<String, ActionHandler> = BTreeMap::new();
        actions.insert(id.to_string(), Box::new(handler));
        ActionRegistry {
            actions: RwLock::new(actions),
        }
    }

    /// Register `handler` under `id`.
    ///
    /// # Errors
    /// [Error::DuplicateAction] if `id` is already registered.
    pub fn register<F>(&self, id: &str, handler: F) -> Result<()>
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let mut actions = self.actions.write();
        if actions.contains_key(id) {
            return Err(Error::DuplicateAction(id.to_string()));
        }
        actions.insert(id.to_string(), Box::new(handler));
        Ok(())
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.actions.read().keys().cloned().collect()
    }

    /// Run the action registered under `id`.
    ///
    /// # Errors
    /// [Error::InvalidArgument] for an unknown id, otherwise whatever the handler returns.
    pub fn execute(&self, id: &str, request: &Value) -> Result<Value> {
        let actions = self.actions.read();
        let Some(handler) = actions.get(id) else {
            return Err(Error::InvalidArgument(format!("no such action: {id}")));
        };
        debug!(action = id, "executing action");
        handler(request)
    }
}
