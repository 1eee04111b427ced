//! Command handler abstraction and the registry that binds names to
//! handlers.

use async_trait::async_trait;
use hostgate_core::{CommandOutcome, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A named operation that can run against the host.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Name callers use to invoke the handler.
    fn name(&self) -> &str;

    /// Get handler description.
    fn description(&self) -> &str {
        ""
    }

    /// Statically declared tier, before action-level overrides.
    fn tier(&self) -> Tier;

    /// Whether running this handler invalidates in-memory host state.
    fn causes_domain_reload(&self) -> bool {
        false
    }

    /// Execute the handler.
    ///
    /// `Ok` with an unsuccessful outcome is an ordinary command failure;
    /// `Err` aborts the whole job.
    async fn execute(&self, params: &Value) -> Result<CommandOutcome, anyhow::Error>;
}

/// Handler description for discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// Handler name
    pub name: String,

    /// Description
    pub description: String,

    /// Declared tier
    pub tier: Tier,

    /// Whether it reloads the host domain
    pub causes_domain_reload: bool,
}

/// Name → handler table, fixed once built.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sorted handler descriptions.
    pub fn describe(&self) -> Vec<HandlerInfo> {
        let mut infos: Vec<_> = self
            .handlers
            .values()
            .map(|h| HandlerInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
                tier: h.tier(),
                causes_domain_reload: h.causes_domain_reload(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

/// Builder collecting explicit registrations at startup.
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl RegistryBuilder {
    /// Register a handler. A later registration under the same name wins.
    pub fn register(self, handler: impl CommandHandler + 'static) -> Self {
        self.register_arc(Arc::new(handler))
    }

    /// Register a shared handler.
    pub fn register_arc(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!("Handler '{}' registered twice, keeping the last one", name);
        }
        self
    }

    /// Finish the registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
