//! Scripted in-memory [`Transport`] for engine tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use unitlink_core::{Policy, RawBackendConfig, RawConfig, RequestDescriptor};

use crate::error::{LinkError, LinkResult};
use crate::transport::Transport;

/// What one scripted call does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeeds with this value.
    Reply(Value),
    /// Never completes; the caller's timeout fires.
    Hang,
    /// Connection refused.
    Network,
    /// 5xx.
    Server(u16),
    /// 4xx.
    Reject(u16),
}

/// Transport whose answers are scripted per call.
///
/// Calls consume the script front to back; once it is empty every call
/// gets the fallback step.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    calls: Mutex<Vec<(String, String)>>,
    health_script: Mutex<VecDeque<bool>>,
    healthy: AtomicBool,
    health_hangs: AtomicBool,
    health_calls: AtomicUsize,
}

impl ScriptedTransport {
    /// Healthy transport that echoes `{"ok": true}` for every call.
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedTransport {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Step::Reply(serde_json::json!({"ok": true}))),
            calls: Mutex::new(Vec::new()),
            health_script: Mutex::new(VecDeque::new()),
            healthy: AtomicBool::new(true),
            health_hangs: AtomicBool::new(false),
            health_calls: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn script_health(&self, results: impl IntoIterator<Item = bool>) {
        self.health_script.lock().unwrap().extend(results);
    }

    pub fn set_health_hangs(&self, hangs: bool) {
        self.health_hangs.store(hangs, Ordering::SeqCst);
    }

    /// `(procedure, idempotency key)` of every call so far, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Idempotency keys of every call so far, in order.
    pub fn keys(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, key)| key).collect()
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, descriptor: &RequestDescriptor) -> LinkResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((descriptor.procedure.clone(), descriptor.key().to_string()));

        let step = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        };

        let procedure = descriptor.procedure.clone();
        match step {
            Step::Reply(value) => Ok(value),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Step::Network => Err(LinkError::NetworkFailure {
                procedure,
                reason: "connection refused".into(),
            }),
            Step::Server(status) => Err(LinkError::Server {
                procedure,
                status,
                message: "unavailable".into(),
            }),
            Step::Reject(status) => Err(LinkError::Rejected {
                procedure,
                status,
                message: "rejected".into(),
            }),
        }
    }

    async fn health(&self) -> LinkResult<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);

        if self.health_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let scripted = self.health_script.lock().unwrap().pop_front();
        let healthy = scripted.unwrap_or_else(|| self.healthy.load(Ordering::SeqCst));

        if healthy {
            Ok(())
        } else {
            Err(LinkError::NetworkFailure {
                procedure: "health".into(),
                reason: "connection refused".into(),
            })
        }
    }
}

/// Raw config with fast timings for tests.
pub fn fast_raw(configure: impl FnOnce(&mut RawBackendConfig)) -> RawConfig {
    let mut backend = RawBackendConfig {
        timeout: Some(100),
        retries: Some(2),
        backoff_base_ms: Some(1),
        probe_interval_ms: Some(50),
        probe_timeout_ms: Some(50),
        ..Default::default()
    };
    configure(&mut backend);

    RawConfig {
        api_url: None,
        backend_config: backend,
    }
}

/// Policy with fast timings for tests.
pub fn fast_policy(configure: impl FnOnce(&mut RawBackendConfig)) -> Policy {
    unitlink_core::resolve(&fast_raw(configure)).unwrap()
}
