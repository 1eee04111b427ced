//! Demo host: a key/value table, a busy flag and a handful of handlers.

use async_trait::async_trait;
use hostgate_core::{CommandOutcome, Tier};
use hostgate_execution::{BlockedBy, BusyFlag, CommandHandler, CommandRequest, HandlerRegistry};
use hostgate_gateway::SubmitRequest;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Mutable state of the demo host.
pub type HostState = Arc<Mutex<BTreeMap<String, Value>>>;

/// The pretend host the demo handlers act on.
#[derive(Clone, Default)]
pub struct DemoHost {
    pub state: HostState,
    pub busy: BusyFlag,
}

impl DemoHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Returns its params.
struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the parameters unchanged"
    }

    fn tier(&self) -> Tier {
        Tier::Instant
    }

    async fn execute(&self, params: &Value) -> anyhow::Result<CommandOutcome> {
        Ok(CommandOutcome::ok(params.clone()))
    }
}

/// Waits `ms` milliseconds.
struct Sleep;

#[async_trait]
impl CommandHandler for Sleep {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for `ms` milliseconds"
    }

    fn tier(&self) -> Tier {
        Tier::Smooth
    }

    async fn execute(&self, params: &Value) -> anyhow::Result<CommandOutcome> {
        let ms = params["ms"].as_u64().unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(CommandOutcome::ok(json!({ "slept_ms": ms })))
    }
}

/// Reports failure with `message`.
struct Fail;

#[async_trait]
impl CommandHandler for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fail"
    }

    fn tier(&self) -> Tier {
        Tier::Smooth
    }

    async fn execute(&self, params: &Value) -> anyhow::Result<CommandOutcome> {
        let message = params["message"].as_str().unwrap_or("failed on purpose");
        Ok(CommandOutcome::failed(message))
    }
}

/// Writes `key = value` into the host table.
struct Set {
    state: HostState,
}

#[async_trait]
impl CommandHandler for Set {
    fn name(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Store `value` under `key`"
    }

    fn tier(&self) -> Tier {
        Tier::Smooth
    }

    async fn execute(&self, params: &Value) -> anyhow::Result<CommandOutcome> {
        let key = params["key"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'key'"))?;
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("host state lock poisoned"))?
            .insert(key.to_string(), value.clone());
        Ok(CommandOutcome::ok(json!({ key: value })))
    }
}

/// Clears the host table and marks the host reloading for `ms`.
struct Reload {
    state: HostState,
    busy: BusyFlag,
}

#[async_trait]
impl CommandHandler for Reload {
    fn name(&self) -> &str {
        "reload"
    }

    fn description(&self) -> &str {
        "Reset host state; the host stays busy for `ms` afterwards"
    }

    fn tier(&self) -> Tier {
        Tier::Heavy
    }

    fn causes_domain_reload(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value) -> anyhow::Result<CommandOutcome> {
        let ms = params["ms"].as_u64().unwrap_or(200);
        let cleared = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("host state lock poisoned"))?;
            let cleared = state.len();
            state.clear();
            cleared
        };

        self.busy.set(Some(BlockedBy::DomainReload));
        let busy = self.busy.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            busy.set(None);
            debug!("Demo host finished reloading");
        });

        Ok(CommandOutcome::ok(json!({ "cleared": cleared })).with_message("reload started"))
    }
}

/// Registry with every demo handler bound to `host`.
pub fn registry(host: &DemoHost) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(Echo)
        .register(Sleep)
        .register(Fail)
        .register(Set {
            state: host.state.clone(),
        })
        .register(Reload {
            state: host.state.clone(),
            busy: host.busy.clone(),
        })
        .build()
}

fn cmd(tool: &str, params: Value) -> CommandRequest {
    CommandRequest::new(tool, params)
}

/// Batches covering every tier and failure mode.
pub fn sample_batches() -> Vec<SubmitRequest> {
    vec![
        SubmitRequest::new(vec![cmd("echo", json!({ "message": "hello" }))])
            .agent("reader")
            .label("instant echo"),
        SubmitRequest::new(vec![
            cmd("set", json!({ "key": "a", "value": 1 })),
            cmd("sleep", json!({ "ms": 50 })),
        ])
        .agent("writer")
        .label("smooth write"),
        SubmitRequest::new(vec![
            cmd("set", json!({ "key": "b", "value": 2 })),
            cmd("fail", json!({ "message": "validation failed" })),
        ])
        .agent("writer")
        .label("atomic rollback")
        .atomic(true),
        SubmitRequest::new(vec![
            cmd("set", json!({ "key": "c", "value": 3 })),
            cmd("fail", json!({})),
            cmd("set", json!({ "key": "d", "value": 4 })),
        ])
        .agent("writer")
        .label("partial failure"),
        SubmitRequest::new(vec![cmd("reload", json!({ "ms": 150 }))])
            .agent("builder")
            .label("reload"),
        SubmitRequest::new(vec![cmd("set", json!({ "key": "e", "value": 5 }))])
            .agent("writer")
            .label("after reload"),
        SubmitRequest::new(vec![cmd("missing_tool", json!({}))])
            .agent("reader")
            .label("unknown tool"),
    ]
}
