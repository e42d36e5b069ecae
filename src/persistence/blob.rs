//! Durable blob storage behind a trait seam.
//!
//! The engine writes its state document to an object store whenever the
//! hot file is written. All blob operations are best-effort from the
//! caller's point of view; only the hot file is load-bearing.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. Ok(None) when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<String>>;

    async fn put(&self, name: &str, body: String) -> Result<()>;
}

/// Object store speaking plain HTTP GET/PUT against a base URL, with an
/// optional bearer token. Works against any S3/GCS-style proxy or a
/// simple file server.
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: String, auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Http(format!("failed to build blob client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

#[async_trait]
impl ObjectStore for HttpBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let mut req = self.http.get(self.url(name));
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(EngineError::Http(format!(
                "blob get {} returned {}",
                name,
                resp.status()
            )));
        }
        Ok(Some(resp.text().await?))
    }

    async fn put(&self, name: &str, body: String) -> Result<()> {
        let mut req = self
            .http
            .put(self.url(name))
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::Http(format!(
                "blob put {} returned {}",
                name,
                resp.status()
            )));
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, String>>,
    puts: Mutex<usize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_count(&self) -> usize {
        *self.puts.lock().await
    }
}

#[async_trait]
impl ObjectStore for MemoryBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.objects.lock().await.get(name).cloned())
    }

    async fn put(&self, name: &str, body: String) -> Result<()> {
        *self.puts.lock().await += 1;
        self.objects.lock().await.insert(name.to_string(), body);
        Ok(())
    }
}
