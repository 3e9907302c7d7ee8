use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

/// What a hook handler decided: either let the session fall through to its
/// own default behavior, or short-circuit with a value.
pub enum HookOutcome<T> {
    Continue,
    Stop(T),
}

/// Observes or overrides the authentication decision for a connecting user.
/// Mirrors the `auth` hook of §6.3: given the username and the client's
/// handshake auth bytes, a plugin may declare the connection authenticated
/// or rejected, bypassing the local/forwarded password check entirely.
#[async_trait]
pub trait AuthPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn auth(
        &self,
        username: &str,
        auth_response: &[u8],
    ) -> Result<HookOutcome<bool>, String>;
}

/// Observes or overrides the response to a `COM_QUERY`. A plugin may
/// substitute its own already-framed result-set bytes for the query, instead
/// of letting it reach the upstream.
#[async_trait]
pub trait QueryPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn com_query(&self, query: &str) -> Result<HookOutcome<Vec<u8>>, String>;
}

/// Name-indexed ordered list of hook subscribers, populated once at startup
/// and read-only for the lifetime of the process. Handlers run in
/// registration order; the first one to return `Stop` wins. A handler that
/// errors is logged and skipped — its failure never affects the outcome
/// carried by earlier handlers, nor aborts the remaining ones.
#[derive(Default)]
pub struct PluginRegistry {
    auth_plugins: Vec<Box<dyn AuthPlugin>>,
    query_plugins: Vec<Box<dyn QueryPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_auth(&mut self, plugin: Box<dyn AuthPlugin>) {
        self.auth_plugins.push(plugin);
    }

    pub fn register_query(&mut self, plugin: Box<dyn QueryPlugin>) {
        self.query_plugins.push(plugin);
    }

    /// One-shot filesystem walk performed at process startup. Each compiled
    /// plugin a deployment ships is expected to register itself by calling
    /// [`PluginRegistry::register_auth`] / [`PluginRegistry::register_query`]
    /// from a constructor named in a manifest file under `dir`; this walk
    /// only discovers which manifests are present and logs them; it does
    /// not itself perform dynamic code loading, since Rust has no idiomatic
    /// answer to Python's runtime module import for this.
    pub fn discover(dir: Option<&str>) -> Self {
        let registry = Self::new();
        let Some(dir) = dir else {
            return registry;
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("plugin discovery: cannot read {dir}: {e}");
                return registry;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                debug!("plugin discovery: found manifest {}", path.display());
            }
        }
        registry
    }

    pub async fn call_auth(&self, username: &str, auth_response: &[u8]) -> Option<bool> {
        for plugin in &self.auth_plugins {
            match plugin.auth(username, auth_response).await {
                Ok(HookOutcome::Stop(value)) => return Some(value),
                Ok(HookOutcome::Continue) => continue,
                Err(e) => {
                    warn!("auth plugin {:?} failed: {e}", plugin.name());
                    continue;
                }
            }
        }
        None
    }

    pub async fn call_com_query(&self, query: &str) -> Option<Vec<u8>> {
        for plugin in &self.query_plugins {
            match plugin.com_query(query).await {
                Ok(HookOutcome::Stop(value)) => return Some(value),
                Ok(HookOutcome::Continue) => continue,
                Err(e) => {
                    warn!("com_query plugin {:?} failed: {e}", plugin.name());
                    continue;
                }
            }
        }
        None
    }
}

pub fn manifest_path(dir: &str, name: &str) -> std::path::PathBuf {
    Path::new(dir).join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysDeny;
    #[async_trait]
    impl AuthPlugin for AlwaysDeny {
        fn name(&self) -> &str {
            "always-deny"
        }
        async fn auth(&self, _username: &str, _auth_response: &[u8]) -> Result<HookOutcome<bool>, String> {
            Ok(HookOutcome::Stop(false))
        }
    }

    struct Noop;
    #[async_trait]
    impl AuthPlugin for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn auth(&self, _username: &str, _auth_response: &[u8]) -> Result<HookOutcome<bool>, String> {
            Ok(HookOutcome::Continue)
        }
    }

    #[tokio::test]
    async fn first_stopping_handler_wins() {
        let mut registry = PluginRegistry::new();
        registry.register_auth(Box::new(Noop));
        registry.register_auth(Box::new(AlwaysDeny));
        assert_eq!(registry.call_auth("alice", b"").await, Some(false));
    }

    #[tokio::test]
    async fn no_handlers_falls_through() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.call_auth("alice", b"").await, None);
    }

    #[tokio::test]
    async fn missing_plugin_dir_yields_empty_registry() {
        let registry = PluginRegistry::discover(Some("/nonexistent/path/for/plugins"));
        assert_eq!(registry.call_auth("alice", b"").await, None);
    }
}
