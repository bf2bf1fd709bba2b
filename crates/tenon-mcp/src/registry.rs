//! Registry client: resolves a server identifier to metadata.
//!
//! Resolution order: fresh cache entry, remote registry lookup, then the
//! built-in fallback table for known identifiers. Only when all three
//! fail does the caller see [`McpError::ServerNotFound`].
//!
//! Cache keys include the feature flags (toolset filter, read-only
//! mode), since those change the metadata the registry hands back.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{McpError, Result};
use crate::metadata::{EnvVarSpec, HeaderSpec, RemoteInfo, ToolServerMetadata};

/// Public Model Context Protocol registry.
const DEFAULT_BASE_URL: &str = "https://registry.modelcontextprotocol.io/v0";

/// How long a cached metadata entry stays fresh.
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Server-specific behavior switches that affect resolved metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Comma-separated toolsets to enable (server-specific).
    pub toolsets: Option<String>,
    /// Restrict the server to read-only tools.
    pub readonly: Option<bool>,
}

impl FeatureFlags {
    fn cache_key_part(&self) -> String {
        format!(
            "{}:{}",
            self.toolsets.as_deref().unwrap_or("-"),
            self.readonly.map_or("-".to_string(), |b| b.to_string())
        )
    }
}

struct CacheEntry {
    metadata: ToolServerMetadata,
    fetched_at: Instant,
}

/// Client for the tool-server registry with a TTL cache.
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl RegistryClient {
    /// Client against the public registry.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Client against a custom registry endpoint (tests, mirrors).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            ttl: CACHE_TTL,
        }
    }

    /// Resolve `(name, version)` to server metadata.
    pub async fn get_server(
        &self,
        name: &str,
        version: &str,
        flags: &FeatureFlags,
    ) -> Result<ToolServerMetadata> {
        let cache_key = format!("{name}:{version}:{}", flags.cache_key_part());

        if let Some(metadata) = self.cached(&cache_key) {
            debug!(server = %name, version = %version, "using cached metadata");
            return Ok(metadata);
        }

        match self.fetch_remote(name).await {
            Ok(metadata) => {
                info!(server = %name, version = %version, "fetched metadata from registry");
                self.cache.lock().expect("registry cache lock poisoned").insert(
                    cache_key,
                    CacheEntry {
                        metadata: metadata.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(metadata)
            }
            Err(e) => {
                warn!(server = %name, error = %e, "registry lookup failed, trying fallback");
                fallback_metadata(name, version, flags)
            }
        }
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .expect("registry cache lock poisoned")
            .clear();
    }

    fn cached(&self, key: &str) -> Option<ToolServerMetadata> {
        let cache = self.cache.lock().expect("registry cache lock poisoned");
        cache.get(key).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.metadata.clone())
            } else {
                None
            }
        })
    }

    async fn fetch_remote(&self, name: &str) -> Result<ToolServerMetadata> {
        // Identifiers contain slashes; the registry uses dashed ids.
        let server_id = name.replace('/', "-");
        let url = format!("{}/server/{server_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("registry request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(McpError::ServerNotFound(name.to_string()));
        }
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!("registry returned {status}")));
        }

        let metadata: ToolServerMetadata = response
            .json()
            .await
            .map_err(|e| McpError::Transport(format!("malformed registry response: {e}")))?;
        Ok(metadata)
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in metadata for known servers, used when the registry is
/// unreachable or does not list them yet.
fn fallback_metadata(
    name: &str,
    version: &str,
    flags: &FeatureFlags,
) -> Result<ToolServerMetadata> {
    if name != "github/mcp-server" {
        return Err(McpError::ServerNotFound(name.to_string()));
    }

    info!(server = %name, "using built-in fallback metadata");

    let headers = vec![
        HeaderSpec {
            name: "Authorization".into(),
            value: "Bearer {GITHUB_TOKEN}".into(),
        },
        HeaderSpec {
            name: "Content-Type".into(),
            value: "application/json".into(),
        },
        HeaderSpec {
            name: "Accept".into(),
            value: "application/json".into(),
        },
        HeaderSpec {
            name: "X-MCP-Toolsets".into(),
            value: flags.toolsets.clone().unwrap_or_else(|| "all".into()),
        },
        HeaderSpec {
            name: "X-MCP-Readonly".into(),
            value: flags.readonly.unwrap_or(false).to_string(),
        },
    ];

    let mut description_parts = vec!["GitHub tool server".to_string()];
    match &flags.toolsets {
        Some(toolsets) => description_parts.push(format!("Toolsets: {toolsets}")),
        None => description_parts.push("All GitHub tools".into()),
    }
    if flags.readonly == Some(true) {
        description_parts.push("(readonly)".into());
    }

    Ok(ToolServerMetadata {
        name: name.to_string(),
        version: version.to_string(),
        description: description_parts.join(" - "),
        packages: vec![],
        remotes: vec![RemoteInfo {
            kind: "http".into(),
            url: "https://api.githubcopilot.com/mcp/".into(),
            headers,
        }],
        env_vars: vec![EnvVarSpec {
            name: "GITHUB_TOKEN".into(),
            required: true,
            description: "GitHub personal access token with appropriate scopes".into(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_body() -> String {
        json!({
            "name": "acme/tools",
            "version": "1.0.0",
            "description": "Acme tools",
            "remotes": [{"type": "http", "url": "https://acme.example/mcp"}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn remote_lookup_parses_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/server/acme-tools")
            .with_status(200)
            .with_body(registry_body())
            .expect(1)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        let metadata = client
            .get_server("acme/tools", "1.0.0", &FeatureFlags::default())
            .await
            .unwrap();

        assert_eq!(metadata.name, "acme/tools");
        assert_eq!(metadata.remotes[0].url, "https://acme.example/mcp");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn second_lookup_hits_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/server/acme-tools")
            .with_status(200)
            .with_body(registry_body())
            .expect(1)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        let flags = FeatureFlags::default();
        client.get_server("acme/tools", "1.0.0", &flags).await.unwrap();
        client.get_server("acme/tools", "1.0.0", &flags).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn different_flags_bypass_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/server/acme-tools")
            .with_status(200)
            .with_body(registry_body())
            .expect(2)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        client
            .get_server("acme/tools", "1.0.0", &FeatureFlags::default())
            .await
            .unwrap();
        client
            .get_server(
                "acme/tools",
                "1.0.0",
                &FeatureFlags {
                    toolsets: Some("repos".into()),
                    readonly: None,
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_server_with_dead_registry_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/server/ghost-server")
            .with_status(404)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        let err = client
            .get_server("ghost/server", "latest", &FeatureFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn known_server_falls_back_when_registry_missing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/server/github-mcp-server")
            .with_status(404)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        let metadata = client
            .get_server(
                "github/mcp-server",
                "latest",
                &FeatureFlags {
                    toolsets: Some("repos,issues".into()),
                    readonly: Some(true),
                },
            )
            .await
            .unwrap();

        assert_eq!(metadata.remotes[0].kind, "http");
        assert!(metadata.description.contains("repos,issues"));
        assert!(metadata.description.contains("readonly"));
        let toolsets = metadata.remotes[0]
            .headers
            .iter()
            .find(|h| h.name == "X-MCP-Toolsets")
            .unwrap();
        assert_eq!(toolsets.value, "repos,issues");
        assert_eq!(metadata.env_vars[0].name, "GITHUB_TOKEN");
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/server/acme-tools")
            .with_status(200)
            .with_body(registry_body())
            .expect(2)
            .create_async()
            .await;

        let client = RegistryClient::with_base_url(server.url());
        let flags = FeatureFlags::default();
        client.get_server("acme/tools", "1.0.0", &flags).await.unwrap();
        client.clear_cache();
        client.get_server("acme/tools", "1.0.0", &flags).await.unwrap();

        mock.assert_async().await;
    }
}
