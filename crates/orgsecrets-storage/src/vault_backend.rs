//! HashiCorp Vault KV v2 value store.
//!
//! Talks to Vault's HTTP API directly with `reqwest`:
//!
//! - `POST   /v1/{mount}/data/{path}` writes a new version (`cas: 0` for
//!   create-only writes)
//! - `GET    /v1/{mount}/data/{path}` reads the latest version
//! - `DELETE /v1/{mount}/metadata/{path}` removes every version and the key
//! - `GET    /v1/{mount}/metadata/{prefix}?list=true` lists children
//!
//! Deletion goes through `metadata/` so a deleted secret disappears from
//! listings instead of lingering as a soft-deleted version.
//!
//! Every path segment is percent-encoded before it is placed in a URL, and
//! `.`/`..` segments are refused, so a key can never address a different
//! path than the one it names.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{SecretFields, StorageError, ValueStore, folder_prefix};

/// Connection settings for a Vault KV v2 mount.
#[derive(Clone)]
pub struct VaultKvConfig {
    /// Vault address, e.g. `http://127.0.0.1:8200`.
    pub address: String,
    /// Token sent as `X-Vault-Token`.
    pub token: String,
    /// KV v2 mount path (default `secret`).
    pub mount: String,
    /// Optional Vault Enterprise namespace.
    pub namespace: Option<String>,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for VaultKvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKvConfig")
            .field("address", &self.address)
            .field("token", &"[redacted]")
            .field("mount", &self.mount)
            .field("namespace", &self.namespace)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// A value store backed by a Vault KV v2 secrets engine.
#[derive(Debug, Clone)]
pub struct VaultKvStore {
    http: reqwest::Client,
    config: VaultKvConfig,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    data: SecretFields,
}

#[derive(Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

impl VaultKvStore {
    /// Build a client for the given mount.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the HTTP client cannot be built.
    pub fn new(config: VaultKvConfig) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StorageError::Open {
                location: config.address.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    /// Build the URL for `path` under `section`, or the reason it is refused.
    fn url(&self, section: &str, path: &str) -> Result<String, String> {
        Ok(format!(
            "{}/v1/{}/{section}/{}",
            self.config.address.trim_end_matches('/'),
            self.config.mount.trim_matches('/'),
            encode_path(path)?,
        ))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("X-Vault-Token", &self.config.token);
        match &self.config.namespace {
            Some(ns) => builder.header("X-Vault-Namespace", ns),
            None => builder,
        }
    }
}

/// Percent-encode each segment of `path`, keeping the `/` separators.
fn encode_path(path: &str) -> Result<String, String> {
    let mut encoded = Vec::new();
    for segment in path.trim_start_matches('/').split('/') {
        if segment == "." || segment == ".." {
            return Err(format!("dot segment in path '{path}'"));
        }
        encoded.push(urlencoding::encode(segment));
    }
    Ok(encoded.join("/"))
}

/// Vault answers a failed check-and-set with 400 and this message.
fn is_cas_mismatch(reason: &str) -> bool {
    reason.contains("check-and-set parameter did not match")
}

/// Render a non-success Vault response as an error reason.
async fn failure_reason(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("vault returned {status}: {}", body.trim())
}

#[async_trait::async_trait]
impl ValueStore for VaultKvStore {
    async fn put(&self, path: &str, fields: &SecretFields) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            path: path.to_owned(),
            reason,
        };
        let url = self.url("data", path).map_err(write_err)?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "data": fields }))
            .send()
            .await
            .map_err(|e| write_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(write_err(failure_reason(response).await));
        }
        debug!(path, "vault kv write");
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, fields: &SecretFields) -> Result<bool, StorageError> {
        let write_err = |reason: String| StorageError::Write {
            path: path.to_owned(),
            reason,
        };
        let url = self.url("data", path).map_err(write_err)?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "options": { "cas": 0 }, "data": fields }))
            .send()
            .await
            .map_err(|e| write_err(e.to_string()))?;

        if response.status().is_success() {
            debug!(path, "vault kv create");
            return Ok(true);
        }
        let status = response.status();
        let reason = failure_reason(response).await;
        if status == StatusCode::BAD_REQUEST && is_cas_mismatch(&reason) {
            debug!(path, "vault kv create refused, path occupied");
            return Ok(false);
        }
        Err(write_err(reason))
    }

    async fn get(&self, path: &str) -> Result<Option<SecretFields>, StorageError> {
        let read_err = |reason: String| StorageError::Read {
            path: path.to_owned(),
            reason,
        };
        let url = self.url("data", path).map_err(read_err)?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| read_err(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(read_err(failure_reason(response).await));
        }

        let body: ReadResponse = response.json().await.map_err(|e| StorageError::Encoding {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Some(body.data.data))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let delete_err = |reason: String| StorageError::Delete {
            path: path.to_owned(),
            reason,
        };
        let url = self.url("metadata", path).map_err(delete_err)?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| delete_err(e.to_string()))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            debug!(path, "vault kv delete");
            return Ok(());
        }
        Err(delete_err(failure_reason(response).await))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let list_err = |reason: String| StorageError::List {
            prefix: prefix.to_owned(),
            reason,
        };
        let folder = self
            .url("metadata", &folder_prefix(prefix))
            .map_err(list_err)?;
        let url = format!("{folder}?list=true");
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| list_err(e.to_string()))?;

        // Vault answers 404 for a prefix with no children.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(list_err(failure_reason(response).await));
        }

        let body: ListResponse = response.json().await.map_err(|e| StorageError::Encoding {
            path: prefix.to_owned(),
            reason: e.to_string(),
        })?;
        let mut keys = body.data.keys;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store(address: &str, mount: &str) -> VaultKvStore {
        VaultKvStore::new(VaultKvConfig {
            address: address.to_owned(),
            token: "root".to_owned(),
            mount: mount.to_owned(),
            namespace: None,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn url_joins_segments_without_double_slashes() {
        let s = store("http://vault:8200/", "/secret/");
        assert_eq!(
            s.url("data", "org/proj/dev/KEY").unwrap(),
            "http://vault:8200/v1/secret/data/org/proj/dev/KEY"
        );
        assert_eq!(
            s.url("metadata", "org/proj/dev/").unwrap(),
            "http://vault:8200/v1/secret/metadata/org/proj/dev/"
        );
    }

    #[test]
    fn reserved_characters_stay_inside_their_segment() {
        let s = store("http://vault:8200", "secret");
        let query = s.url("data", "o/p/dev/KEY?v=1").unwrap();
        let fragment = s.url("data", "o/p/dev/KEY#2").unwrap();
        assert_eq!(query, "http://vault:8200/v1/secret/data/o/p/dev/KEY%3Fv%3D1");
        assert_eq!(fragment, "http://vault:8200/v1/secret/data/o/p/dev/KEY%232");
        assert_ne!(query, fragment);

        let built = s
            .request(reqwest::Method::GET, query)
            .build()
            .unwrap();
        assert_eq!(built.url().path(), "/v1/secret/data/o/p/dev/KEY%3Fv%3D1");
        assert_eq!(built.url().query(), None);
    }

    #[test]
    fn dot_segments_are_refused() {
        let s = store("http://vault:8200", "secret");
        assert!(s.url("data", "o/p/../X").is_err());
        assert!(s.url("data", "o/p/dev/..").is_err());
        assert!(s.url("data", "o/p/./X").is_err());
        assert!(s.url("data", "o/p/dev/...").is_ok());
    }

    #[tokio::test]
    async fn refused_path_fails_before_any_request() {
        // Nothing listens on port 9; a request would fail with a transport error.
        let s = store("http://127.0.0.1:9", "secret");
        let fields = SecretFields {
            value: "v".to_owned(),
            created_at: 0,
            created_by: "u".to_owned(),
            description: String::new(),
        };
        let err = s.put("o/p/../X", &fields).await.unwrap_err();
        assert!(err.to_string().contains("dot segment"), "{err}");
    }

    #[test]
    fn cas_mismatch_is_recognized() {
        assert!(is_cas_mismatch(
            r#"vault returned 400 Bad Request: {"errors":["check-and-set parameter did not match the current version"]}"#
        ));
        assert!(!is_cas_mismatch(r#"vault returned 400 Bad Request: {"errors":["no data provided"]}"#));
    }

    #[test]
    fn debug_redacts_token() {
        let s = store("http://vault:8200", "secret");
        let rendered = format!("{:?}", s.config);
        assert!(!rendered.contains("root"));
    }

    #[test]
    fn read_response_decodes_kv_v2_envelope() {
        let raw = r#"{"data":{"data":{"value":"v","created_at":1,"created_by":"u","description":"d"},"metadata":{"version":3}}}"#;
        let parsed: ReadResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.data.value, "v");
        assert_eq!(parsed.data.data.created_at, 1);
    }
}
