//! External Payload Gateway (4.C): transparently offloads oversized
//! in-memory maps to external storage and reads them back. The storage
//! backend itself is out of scope (§1) -- this module defines the trait and
//! an in-memory stand-in, following the teacher's provider-trait pattern.

use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    WorkflowInput,
    WorkflowOutput,
    TaskInput,
    TaskOutput,
}

impl PayloadKind {
    fn as_str(self) -> &'static str {
        match self {
            PayloadKind::WorkflowInput => "WORKFLOW_INPUT",
            PayloadKind::WorkflowOutput => "WORKFLOW_OUTPUT",
            PayloadKind::TaskInput => "TASK_INPUT",
            PayloadKind::TaskOutput => "TASK_OUTPUT",
        }
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("payload not found at path: {path}"))]
    NotFound { path: String },

    #[snafu(display("payload serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Backing store for externalized payloads, addressed by opaque path.
#[async_trait]
pub trait PayloadStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, path: &str, payload: &serde_json::Map<String, Value>) -> Result<()>;
    async fn get(&self, path: &str) -> Result<serde_json::Map<String, Value>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPayloadStore {
    blobs: Mutex<HashMap<String, serde_json::Map<String, Value>>>,
}

impl InMemoryPayloadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, path: &str, payload: &serde_json::Map<String, Value>) -> Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.to_string(), payload.clone());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<serde_json::Map<String, Value>> {
        self.blobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .cloned()
            .context(NotFoundSnafu { path })
    }
}

/// Outcome of `verify_and_upload` (4.C): either the payload stayed inline,
/// or it was moved externally and the caller must record the returned path
/// in the matching `externalXxxPath` field and clear the in-memory map.
pub enum UploadOutcome {
    Inline,
    Externalized { path: String },
}

pub struct PayloadGateway<S: PayloadStore> {
    store: S,
    threshold_bytes: usize,
}

impl<S: PayloadStore> PayloadGateway<S> {
    #[must_use]
    pub fn new(store: S, threshold_bytes: usize) -> Self {
        Self {
            store,
            threshold_bytes,
        }
    }

    /// Download a previously-externalized payload.
    ///
    /// # Errors
    /// Returns an error if the path is unknown to the backing store.
    pub async fn download(&self, path: &str) -> Result<serde_json::Map<String, Value>> {
        self.store.get(path).await
    }

    /// If `payload`'s serialized size exceeds the configured threshold,
    /// persist it externally under a fresh path and return that path so the
    /// caller can clear the in-memory map and record the path. Otherwise
    /// leave it untouched. Emits a usage record for `(name, op, kind)`.
    ///
    /// # Errors
    /// Returns an error if serialization or the external write fails.
    pub async fn verify_and_upload(
        &self,
        name: &str,
        payload: &serde_json::Map<String, Value>,
        kind: PayloadKind,
    ) -> Result<UploadOutcome> {
        let serialized = serde_json::to_vec(payload).context(SerializationSnafu)?;
        if serialized.len() <= self.threshold_bytes {
            debug!(name, op = "upload", kind = kind.as_str(), "payload kept inline");
            return Ok(UploadOutcome::Inline);
        }

        let path = format!("{}/{}/{}", kind.as_str(), name, uuid::Uuid::new_v4());
        self.store.put(&path, payload).await?;
        debug!(
            name,
            op = "upload",
            kind = kind.as_str(),
            bytes = serialized.len(),
            %path,
            "payload externalized"
        );
        Ok(UploadOutcome::Externalized { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn small_payload_stays_inline() {
        let gateway = PayloadGateway::new(InMemoryPayloadStore::new(), 10_240);
        let payload = serde_json::Map::from_iter([("a".to_string(), json!(1))]);
        let outcome = gateway
            .verify_and_upload("task1", &payload, PayloadKind::TaskOutput)
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Inline));
    }

    #[tokio::test]
    async fn oversized_payload_is_externalized_and_downloadable() {
        let gateway = PayloadGateway::new(InMemoryPayloadStore::new(), 16);
        let payload =
            serde_json::Map::from_iter([("big".to_string(), json!("x".repeat(100)))]);
        let outcome = gateway
            .verify_and_upload("task1", &payload, PayloadKind::TaskOutput)
            .await
            .unwrap();
        let path = match outcome {
            UploadOutcome::Externalized { path } => path,
            UploadOutcome::Inline => panic!("expected externalization"),
        };
        let downloaded = gateway.download(&path).await.unwrap();
        assert_eq!(downloaded, payload);
    }
}
