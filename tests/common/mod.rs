#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use careerpath_sync::connectivity::Connectivity;
use careerpath_sync::error::{DeliveryError, LoaderError};
use careerpath_sync::model::QueuedAction;
use careerpath_sync::remote::{DatasetLoader, Delivery};
use careerpath_sync::store::ActionStore;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};

pub async fn memory_store(retry_limit: u32) -> Arc<ActionStore> {
    let store = Arc::new(ActionStore::new("sqlite::memory:", retry_limit));
    store.initialize().await.unwrap();
    store
}

/// Delivery fake that fails actions whose payload `name` is listed, and
/// records every delivered id in call order.
#[derive(Clone, Default)]
pub struct RecordingDelivery {
    pub calls: Arc<Mutex<Vec<String>>>,
    fail_names: Arc<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    go_offline_on: Option<(String, Connectivity)>,
    panic_on: Option<String>,
}

impl RecordingDelivery {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: Arc::new(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    /// Each delivery waits for a permit from `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Flips `connectivity` offline while delivering the action named `name`.
    pub fn offline_during(mut self, name: &str, connectivity: Connectivity) -> Self {
        self.go_offline_on = Some((name.to_string(), connectivity));
        self
    }

    pub fn panicking_on(mut self, name: &str) -> Self {
        self.panic_on = Some(name.to_string());
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

fn name_of(action: &QueuedAction) -> String {
    action
        .payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, action: &QueuedAction) -> Result<(), DeliveryError> {
        self.calls.lock().await.push(action.id.clone());
        let name = name_of(action);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some((trigger, connectivity)) = &self.go_offline_on {
            if *trigger == name {
                connectivity.set_online(false);
                tokio::task::yield_now().await;
            }
        }
        if self.panic_on.as_deref() == Some(name.as_str()) {
            panic!("delivery blew up");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_names.contains(&name) {
            return Err(DeliveryError::Failed(format!("remote rejected {name}")));
        }
        Ok(())
    }
}

/// Loader fake answering from a fixed table; unknown keys fail.
#[derive(Clone, Default)]
pub struct RecordingLoader {
    pub calls: Arc<Mutex<Vec<String>>>,
    responses: Arc<HashMap<String, Vec<Value>>>,
    delay: Option<(String, Duration)>,
}

impl RecordingLoader {
    pub fn with(responses: Vec<(&str, Vec<Value>)>) -> Self {
        Self {
            responses: Arc::new(
                responses
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn slow_on(mut self, key: &str, delay: Duration) -> Self {
        self.delay = Some((key.to_string(), delay));
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl DatasetLoader for RecordingLoader {
    async fn load(&self, key: &str) -> Result<Vec<Value>, LoaderError> {
        self.calls.lock().await.push(key.to_string());
        if let Some((slow_key, delay)) = &self.delay {
            if slow_key == key {
                tokio::time::sleep(*delay).await;
            }
        }
        self.responses
            .get(key)
            .cloned()
            .ok_or_else(|| LoaderError::Failed(format!("network unavailable for {key}")))
    }
}
