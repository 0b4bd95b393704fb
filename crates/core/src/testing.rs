use crate::models::RawRuleRecord;
use crate::query::QueryExecutor;
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use tracing::Level;

/// In-memory executor answering only the expressions it was given.
#[derive(Debug, Default)]
pub(crate) struct ScriptedExecutor {
    responses: HashMap<String, Vec<RawRuleRecord>>,
    failures: HashSet<String>,
    partial: HashMap<String, Vec<RawRuleRecord>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(
        mut self,
        expression: impl Into<String>,
        records: Vec<RawRuleRecord>,
    ) -> Self {
        self.responses.insert(expression.into(), records);
        self
    }

    pub(crate) fn fail(mut self, expression: impl Into<String>) -> Self {
        self.failures.insert(expression.into());
        self
    }

    /// Answers `expression` only when missing packages are tolerated; a
    /// strict call sees the build tool's exit code 3.
    pub(crate) fn partial(
        mut self,
        expression: impl Into<String>,
        records: Vec<RawRuleRecord>,
    ) -> Self {
        self.partial.insert(expression.into(), records);
        self
    }

    /// Expressions in call order; `execute_keep_going` calls carry a
    /// `keep_going: ` prefix.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, expression: &str) -> anyhow::Result<Vec<RawRuleRecord>> {
        if self.failures.contains(expression) {
            return Err(anyhow!("bazel query failed with exit status: 7"));
        }
        self.responses
            .get(expression)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted response for `{expression}`"))
    }
}

impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, expression: &str) -> anyhow::Result<Vec<RawRuleRecord>> {
        self.calls.lock().unwrap().push(expression.to_string());
        if self.partial.contains_key(expression) {
            return Err(anyhow!("bazel query failed with exit status: 3"));
        }
        self.answer(expression)
    }

    async fn execute_keep_going(&self, expression: &str) -> anyhow::Result<Vec<RawRuleRecord>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("keep_going: {expression}"));
        if let Some(records) = self.partial.get(expression) {
            return Ok(records.clone());
        }
        self.answer(expression)
    }
}

#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A subscriber scoped to whatever it is attached to, plus its output.
pub(crate) fn capture_logs() -> (impl tracing::Subscriber + Send + Sync, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (subscriber, logs)
}
