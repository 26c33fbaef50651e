//! Shared setup for commands that talk to the API or play audio.
//!
//! Loads the config file, installs logging and owns the Tokio runtime the
//! command's async work runs on.

use std::future::Future;
use std::sync::Arc;

use soundwalk::catalog::Catalog;
use soundwalk::config::{config_file_path, ConfigFile};
use soundwalk::logging::{init_logging, LoggingConfig, WorkerGuard};
use soundwalk::provider::{
    ApiDownloadUrls, HttpPayloadFetcher, HttpWorkProvider, PayloadFetcher, ReqwestClient,
};
use soundwalk::store::JsonFileStore;
use tokio::runtime::Runtime;

use crate::error::CliError;

pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    /// Load configuration and start logging. `api_url` overrides
    /// `[api] base_url`.
    pub fn new(api_url: Option<&str>) -> Result<Self, CliError> {
        let mut config = ConfigFile::load()?;
        if let Some(url) = api_url {
            config.api.base_url = url.to_string();
        }

        let log_guard = init_logging(&LoggingConfig::from(&config.logging))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("soundwalk-worker")
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            runtime,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        tracing::info!(
            version = soundwalk::VERSION,
            command,
            config = %config_file_path().display(),
            api = %self.config.api.base_url,
            "soundwalk starting"
        );
    }

    /// Run a future to completion on the command's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn http_client(&self) -> Result<ReqwestClient, CliError> {
        Ok(ReqwestClient::with_timeout(self.config.api.timeout())?)
    }

    pub fn provider(&self) -> Result<HttpWorkProvider<ReqwestClient>, CliError> {
        Ok(HttpWorkProvider::new(
            self.http_client()?,
            &self.config.api.base_url,
        )?)
    }

    pub fn store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.config.cache.directory)
    }

    pub fn catalog(&self) -> Result<Catalog, CliError> {
        Ok(Catalog::new(
            Arc::new(self.provider()?),
            Arc::new(self.store()),
        ))
    }

    pub fn download_urls(&self) -> Result<ApiDownloadUrls, CliError> {
        Ok(ApiDownloadUrls::new(&self.config.api.base_url)?)
    }

    pub fn payload_fetcher(&self) -> Result<Arc<dyn PayloadFetcher>, CliError> {
        Ok(Arc::new(HttpPayloadFetcher::new(self.http_client()?)))
    }
}
