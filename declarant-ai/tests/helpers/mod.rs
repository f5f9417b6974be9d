//! Shared test utilities
//!
//! A scripted classification client, database setup and upload builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use declarant_ai::models::{ClassificationResult, NormalizedItem};
use declarant_ai::services::{ClassificationClient, ClassificationError};
use declarant_ai::AppState;
use declarant_common::config::{AgentType, ClassifierConfig};
use declarant_common::events::EventBus;
use sqlx::SqlitePool;

/// What the fake does for one row
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { code: &'static str, confidence: f64 },
    Fail(&'static str),
    /// Never answers within any test timeout
    Hang,
    /// Succeed after a delay
    Slow(Duration),
}

/// Classification client driven by a per-row script
///
/// Unscripted rows succeed with code `0000.00.000` and confidence 90 after a
/// short delay.
pub struct FakeClassifier {
    script: HashMap<usize, Behavior>,
    default_delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            default_delay: Duration::from_millis(5),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, row_index: usize, behavior: Behavior) -> Self {
        self.script.insert(row_index, behavior);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClassificationClient for FakeClassifier {
    async fn classify(
        &self,
        item: &NormalizedItem,
        _agent: AgentType,
    ) -> Result<ClassificationResult, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        match self.script.get(&item.row_index) {
            Some(Behavior::Succeed { code, confidence }) => {
                tokio::time::sleep(self.default_delay).await;
                Ok(ClassificationResult::success(item.row_index, *code, *confidence, "scripted"))
            }
            Some(Behavior::Fail(message)) => Err(ClassificationError::Service(503, message.to_string())),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ClassificationError::Network("unreachable".to_string()))
            }
            Some(Behavior::Slow(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(ClassificationResult::success(item.row_index, "0000.00.000", 90.0, "slow"))
            }
            None => {
                tokio::time::sleep(self.default_delay).await;
                Ok(ClassificationResult::success(item.row_index, "0000.00.000", 90.0, "default"))
            }
        }
    }
}

pub fn test_config() -> ClassifierConfig {
    ClassifierConfig {
        max_batch_size: 1000,
        concurrency_limit: 4,
        item_timeout_secs: 1,
        ..Default::default()
    }
}

pub async fn test_pool() -> SqlitePool {
    declarant_ai::db::init_memory_pool().await.unwrap()
}

pub async fn test_app_state(client: Arc<dyn ClassificationClient>) -> AppState {
    AppState::new(test_pool().await, EventBus::new(100), test_config(), client)
}

/// CSV upload with a `description,quantity,unit` header
pub fn csv_upload(descriptions: &[&str]) -> Vec<u8> {
    let mut out = String::from("description,quantity,unit\n");
    for (i, d) in descriptions.iter().enumerate() {
        out.push_str(&format!("{},{},kg\n", d, i + 1));
    }
    out.into_bytes()
}

/// `n` rows named `item 0`, `item 1`, ...
pub fn numbered_csv(n: usize) -> Vec<u8> {
    let names: Vec<String> = (0..n).map(|i| format!("item {}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    csv_upload(&refs)
}

pub const BOUNDARY: &str = "declarant-test-boundary";

/// multipart/form-data body with a `file` part and optional text parts
pub fn multipart_body(filename: &str, file: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
