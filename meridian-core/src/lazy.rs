//! Deferred provider construction: a provider is only built (API client
//! constructed, credentials validated) on first use, not at registration
//! time.
//!
//! Absent from the teacher, which constructs every configured provider
//! eagerly in `create_provider`; built fresh, grounded on the
//! `tokio::sync::OnceCell`-guarded-by-`Mutex` idiom (first caller drives
//! construction, concurrent callers await the same attempt) as used for
//! connection-pool warm-up in `mhismail3-tron`'s client setup.

use crate::error::{OrchestratorError, ProviderError, Result};
use crate::models::{Request, Response};
use crate::providers::{Capabilities, Provider};
use dashmap::DashMap;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LazyProviderConfig {
    pub init_timeout: Duration,
    pub max_init_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for LazyProviderConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            max_init_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

type Builder = Box<dyn Fn() -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Wraps a provider factory, memoizing the constructed instance behind a
/// `OnceCell`. Every public method delegates to the built provider,
/// triggering construction on the first call.
pub struct LazyProvider {
    id: String,
    config: LazyProviderConfig,
    builder: Builder,
    cell: OnceCell<Arc<dyn Provider>>,
    init_lock: Mutex<()>,
    init_failure: std::sync::Mutex<Option<String>>,
}

impl LazyProvider {
    pub fn new(
        id: impl Into<String>,
        config: LazyProviderConfig,
        builder: impl Fn() -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            builder: Box::new(builder),
            cell: OnceCell::new(),
            init_lock: Mutex::new(()),
            init_failure: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Drive construction, retrying up to `max_init_attempts` with
    /// `retry_delay` between attempts, each bounded by `init_timeout`.
    /// Concurrent callers serialize on `init_lock` and observe the same
    /// outcome; a prior failure is cached and surfaced without retrying
    /// construction again until `reset()`.
    async fn ensure_initialized(&self) -> Result<Arc<dyn Provider>> {
        if let Some(provider) = self.cell.get() {
            return Ok(Arc::clone(provider));
        }
        let _guard = self.init_lock.lock().await;
        if let Some(provider) = self.cell.get() {
            return Ok(Arc::clone(provider));
        }
        if let Some(cause) = self.init_failure.lock().unwrap().clone() {
            return Err(OrchestratorError::ProviderNotAvailable {
                provider_id: self.id.clone(),
                cause,
            });
        }

        let mut last_err = String::new();
        for attempt in 0..self.config.max_init_attempts {
            let built = tokio::time::timeout(self.config.init_timeout, async {
                (self.builder)()
            })
            .await;
            match built {
                Ok(Ok(provider)) => {
                    let provider = self.cell.get_or_init(|| async { provider }).await;
                    return Ok(Arc::clone(provider));
                }
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => last_err = "initialization timed out".to_string(),
            }
            if attempt + 1 < self.config.max_init_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        *self.init_failure.lock().unwrap() = Some(last_err.clone());
        Err(OrchestratorError::ProviderNotAvailable {
            provider_id: self.id.clone(),
            cause: last_err,
        })
    }

    /// Forget both the built instance and any cached init failure, so the
    /// next call re-drives construction from scratch.
    pub fn reset(&mut self) {
        self.cell = OnceCell::new();
        *self.init_failure.lock().unwrap() = None;
    }

    pub async fn preload(&self) -> Result<()> {
        self.ensure_initialized().await.map(|_| ())
    }

    pub async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response> {
        let provider = self.ensure_initialized().await?;
        Ok(provider.complete(request, cancel).await?)
    }

    pub async fn complete_stream(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<Response, ProviderError>>> {
        let provider = self.ensure_initialized().await?;
        Ok(provider.complete_stream(request, cancel).await?)
    }

    pub async fn health_check(&self) -> Result<()> {
        let provider = self.ensure_initialized().await?;
        Ok(provider.health_check().await?)
    }

    /// Static capabilities require no network access, but still need a
    /// built instance: if construction has already failed, report that
    /// rather than attempting another build.
    pub async fn capabilities(&self) -> Result<Capabilities> {
        let provider = self.ensure_initialized().await?;
        Ok(provider.capabilities())
    }
}

/// Holds every configured provider behind a [`LazyProvider`], keyed by id.
#[derive(Default)]
pub struct LazyProviderRegistry {
    providers: DashMap<String, Arc<LazyProvider>>,
}

impl LazyProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn register(&self, provider: LazyProvider) -> Arc<LazyProvider> {
        let provider = Arc::new(provider);
        self.providers.insert(provider.id().to_string(), Arc::clone(&provider));
        provider
    }

    pub fn get(&self, id: &str) -> Option<Arc<LazyProvider>> {
        self.providers.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Drive construction of a single provider without issuing a request.
    pub async fn preload(&self, id: &str) -> Result<()> {
        match self.get(id) {
            Some(provider) => provider.preload().await,
            None => Err(OrchestratorError::Configuration {
                message: format!("no provider registered under id '{id}'"),
            }),
        }
    }

    /// Drive construction of every registered provider concurrently.
    /// Returns the ids that failed to initialize, without aborting on the
    /// first failure.
    pub async fn preload_all(&self) -> Vec<(String, OrchestratorError)> {
        let entries: Vec<Arc<LazyProvider>> = self.providers.iter().map(|e| Arc::clone(e.value())).collect();
        let results = futures::future::join_all(entries.iter().map(|p| p.preload())).await;
        entries
            .into_iter()
            .zip(results)
            .filter_map(|(p, r)| r.err().map(|e| (p.id().to_string(), e)))
            .collect()
    }
}
