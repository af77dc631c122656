//! Runtime orchestration: configuration in, running clients out.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use onecat_runtime::OnecatRuntime;
//!
//! // Searches ./onecat.toml and <config dir>/onecat/onecat.toml
//! let runtime = OnecatRuntime::load()?;
//!
//! // Or a specific file
//! let runtime = OnecatRuntime::builder()
//!     .config_file("deploy/onecat.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.client("main")?.on_all(|_client: OneBotClient, event: InboundEvent| async move {
//!     tracing::info!(event_type = %event.event_type(), "event");
//! });
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{error, info, warn};

use onecat_adapter_onebot::{ClientOptions, OneBotClient};
use onecat_transport::BindingRegistry;

use crate::config::{ClientSection, ConfigLoader, OnecatConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::store::{ConfigStore, MemoryConfigStore, section_as};

/// Owns the bindings and one [`OneBotClient`] per enabled binding.
pub struct OnecatRuntime {
    config: OnecatConfig,
    store: Arc<dyn ConfigStore>,
    registry: Arc<BindingRegistry>,
    clients: Vec<OneBotClient>,
    running: Mutex<bool>,
}

impl OnecatRuntime {
    /// Loads configuration from the default locations and builds the
    /// runtime.
    pub fn load() -> RuntimeResult<Self> {
        RuntimeBuilder::new().build()
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds the runtime from an already loaded configuration.
    ///
    /// Validates `config`, installs logging, snapshots the configuration
    /// store, then builds the binding registry and the clients.
    pub fn from_config(config: OnecatConfig) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::from_config(&config));
        let options = Self::client_options(store.as_ref())?;

        let registry = Arc::new(BindingRegistry::from_configs(config.bindings.clone())?);
        let clients: Vec<OneBotClient> = registry
            .bindings()
            .into_iter()
            .map(|binding| OneBotClient::new(binding, options.clone()))
            .collect();

        info!(
            clients = clients.len(),
            log_level = %config.logging.level,
            storage = %store.root_dir().display(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            store,
            registry,
            clients,
            running: Mutex::new(false),
        })
    }

    fn client_options(store: &dyn ConfigStore) -> RuntimeResult<ClientOptions> {
        let section: ClientSection = section_as(store, "client")?.unwrap_or_default();
        Ok(section.options())
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &OnecatConfig {
        &self.config
    }

    /// The configuration store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Directory for persistent data.
    pub fn root_dir(&self) -> &Path {
        self.store.root_dir()
    }

    /// The binding registry.
    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// Every client, sorted by binding name.
    pub fn clients(&self) -> &[OneBotClient] {
        &self.clients
    }

    /// The client over the binding named `name`.
    pub fn client(&self, name: &str) -> RuntimeResult<&OneBotClient> {
        self.clients
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| RuntimeError::ClientNotFound(name.to_string()))
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Starts every client. A client that fails to start is logged and
    /// skipped; the others keep running.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.lock();
            if *running {
                warn!("Runtime is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Starting onecat runtime");
        let results = join_all(self.clients.iter().map(|client| client.start())).await;
        let mut started = 0;
        for (client, result) in self.clients.iter().zip(results) {
            match result {
                Ok(()) => started += 1,
                Err(e) => error!(name = %client.name(), error = %e, "Failed to start client"),
            }
        }
        info!(started, total = self.clients.len(), "Runtime started");
        Ok(())
    }

    /// Stops every client and closes the bindings.
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.lock();
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        info!("Stopping onecat runtime");
        join_all(self.clients.iter().map(|client| client.stop())).await;
        self.registry.close_all();
        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C (or SIGTERM on unix).
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("onecat runtime is running, press Ctrl+C to stop");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl std::fmt::Debug for OnecatRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnecatRuntime")
            .field("bindings", &self.registry.names())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`OnecatRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the current directory and the user config directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new()
                .with_current_dir()
                .with_user_config_dir(),
        }
    }

    /// Loads exactly this file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables `ONECAT_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a configuration programmatically.
    pub fn merge(mut self, config: OnecatConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<OnecatRuntime> {
        let config = self.config_loader.load()?;
        OnecatRuntime::from_config(config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use onecat_core::{
        BindingConfig, ConnectionState, HttpClientConfig, WsClientConfig, WsServerConfig,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    fn local_server(name: &str) -> BindingConfig {
        let mut config = WsServerConfig::new(name);
        config.port = 0;
        BindingConfig::WsServer(config)
    }

    // The returned directory is removed when dropped; keep it alive for the test.
    fn test_config(bindings: Vec<BindingConfig>) -> (OnecatConfig, TempDir) {
        let storage = TempDir::new().unwrap();
        let mut config = OnecatConfig::default();
        config.bindings = bindings;
        config.storage.root_dir = Some(storage.path().to_path_buf());
        (config, storage)
    }

    #[test]
    fn test_clients_per_enabled_binding() {
        let mut disabled = WsClientConfig::new("standby");
        disabled.enabled = false;
        let (mut config, storage) = test_config(vec![
            HttpClientConfig::new("api").into(),
            disabled.into(),
            local_server("inbound"),
        ]);
        config.client.action_timeout_ms = 1_234;

        let runtime = OnecatRuntime::from_config(config).unwrap();

        let names: Vec<&str> = runtime.clients().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["api", "inbound"]);
        assert_eq!(
            runtime.client("api").unwrap().options().action_timeout,
            Duration::from_millis(1_234)
        );
        assert!(matches!(
            runtime.client("standby"),
            Err(RuntimeError::ClientNotFound(name)) if name == "standby"
        ));
        assert_eq!(runtime.root_dir(), storage.path());
        assert!(runtime.store().section("bindings").is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (config, _storage) = test_config(vec![
            HttpClientConfig::new("dup").into(),
            local_server("dup"),
        ]);
        assert!(matches!(
            OnecatRuntime::from_config(config),
            Err(RuntimeError::Config(ConfigError::DuplicateBinding(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_until_starts_and_stops() {
        let (config, _storage) = test_config(vec![
            HttpClientConfig::new("api").into(),
            local_server("inbound"),
        ]);
        let runtime = OnecatRuntime::from_config(config).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = runtime.run_until(async {
            let _ = rx.await;
        });
        let check = async {
            tokio::task::yield_now().await;
            for client in runtime.clients() {
                let mut state = client.subscribe_state();
                while !state.borrow_and_update().is_connected() {
                    state.changed().await.unwrap();
                }
            }
            assert!(runtime.is_running());
            tx.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(run, check);
        result.unwrap();

        assert!(!runtime.is_running());
        for client in runtime.clients() {
            assert!(!client.is_running());
            assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        }
        assert!(runtime.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let (config, _storage) = test_config(Vec::new());
        let runtime = OnecatRuntime::from_config(config).unwrap();
        runtime.stop().await.unwrap();
        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.is_running());
        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
    }
}
