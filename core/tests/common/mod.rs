//! Test doubles shared by the core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use homeboard_core::{DashboardPlugin, DataSource, SourceError, SourceFactory};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays a script of results; the last entry repeats once exhausted
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Result<Value, String>>>,
    last: Mutex<Option<Result<Value, String>>>,
    conditional: bool,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str, script: Vec<Result<Value, String>>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            conditional: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn values(name: &str, values: Vec<Value>) -> Self {
        Self::new(name, values.into_iter().map(Ok).collect())
    }

    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => {
                *self.last.lock().unwrap() = Some(result.clone());
                result
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Ok(Value::Null)),
        };
        result.map_err(SourceError::Other)
    }

    fn endpoint_name(&self) -> &str {
        &self.name
    }

    fn conditional_fetch(&self) -> bool {
        self.conditional
    }
}

/// Always returns the same value
pub struct StaticSource {
    pub name: String,
    pub value: Value,
}

#[async_trait]
impl DataSource for StaticSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        Ok(self.value.clone())
    }

    fn endpoint_name(&self) -> &str {
        &self.name
    }
}

/// Always fails with the given message
pub struct FailingSource {
    pub name: String,
    pub message: String,
}

#[async_trait]
impl DataSource for FailingSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        Err(SourceError::Other(self.message.clone()))
    }

    fn endpoint_name(&self) -> &str {
        &self.name
    }
}

/// Sleeps before answering
pub struct SlowSource {
    pub name: String,
    pub delay: Duration,
}

#[async_trait]
impl DataSource for SlowSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(Value::Bool(true))
    }

    fn endpoint_name(&self) -> &str {
        &self.name
    }
}

/// Dashboard plugin assembled from factories
pub struct TestDashboard {
    pub name: String,
    pub factories: Vec<SourceFactory>,
}

impl DashboardPlugin for TestDashboard {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_sources(&self) -> Vec<SourceFactory> {
        self.factories.clone()
    }
}
