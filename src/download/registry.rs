//! Source-adapter registry with alias dispatch and auto-detection.
//!
//! Adapters register once at startup; lookups are case-insensitive over
//! source names and aliases. Auto-detection walks adapters in
//! registration order and returns the first whose validation accepts the
//! identifier, warning when several would.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{DownloadError, Downloader, SourceValidation};

/// Result of source auto-detection.
#[derive(Debug)]
pub struct Detection {
    /// Source type of the winning adapter.
    pub source: String,
    /// The winning adapter's validation outcome.
    pub validation: SourceValidation,
    /// Other sources that also claimed the identifier.
    pub also_possible: Vec<String>,
}

#[derive(Default)]
struct Inner {
    adapters: Vec<Arc<dyn Downloader>>,
    by_name: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
}

/// Process-wide registry of source adapters.
///
/// All access goes through an RW lock; registration and lookups from
/// concurrent tasks serialize cleanly.
#[derive(Default)]
pub struct DownloaderRegistry {
    inner: RwLock<Inner>,
}

impl DownloaderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its source type plus optional aliases.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Registry`] when the source type or any
    /// alias is already taken.
    pub async fn register(
        &self,
        adapter: Arc<dyn Downloader>,
        aliases: &[&str],
    ) -> Result<(), DownloadError> {
        let mut inner = self.inner.write().await;
        let name = adapter.source_type().to_ascii_lowercase();

        if inner.by_name.contains_key(&name) {
            return Err(DownloadError::Registry(format!(
                "source type '{name}' is already registered"
            )));
        }
        for alias in aliases {
            let alias = alias.to_ascii_lowercase();
            if inner.aliases.contains_key(&alias) || inner.by_name.contains_key(&alias) {
                return Err(DownloadError::Registry(format!(
                    "alias '{alias}' is already registered"
                )));
            }
        }

        let index = inner.adapters.len();
        debug!(source = %name, ?aliases, "registering source adapter");
        inner.adapters.push(adapter);
        inner.by_name.insert(name, index);
        for alias in aliases {
            inner.aliases.insert(alias.to_ascii_lowercase(), index);
        }
        Ok(())
    }

    /// Looks up an adapter by source name or alias, case-insensitively.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Downloader>> {
        let inner = self.inner.read().await;
        let key = name.to_ascii_lowercase();
        let index = inner
            .by_name
            .get(&key)
            .or_else(|| inner.aliases.get(&key))?;
        inner.adapters.get(*index).cloned()
    }

    /// Returns registered source types in registration order.
    pub async fn sources(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .adapters
            .iter()
            .map(|a| a.source_type().to_string())
            .collect()
    }

    /// Auto-detects the source for an identifier.
    ///
    /// Walks adapters in registration order; the first accepting
    /// validation wins. When more adapters would also accept, their names
    /// are returned so the caller can surface the ambiguity.
    pub async fn detect(&self, id: &str) -> Option<Detection> {
        let inner = self.inner.read().await;
        let mut winner: Option<(String, SourceValidation)> = None;
        let mut also_possible = Vec::new();

        for adapter in &inner.adapters {
            let validation = adapter.validate(id);
            if validation.valid {
                if winner.is_none() {
                    winner = Some((adapter.source_type().to_string(), validation));
                } else {
                    also_possible.push(adapter.source_type().to_string());
                }
            }
        }

        let (source, validation) = winner?;
        if !also_possible.is_empty() {
            warn!(
                id,
                winner = %source,
                also = ?also_possible,
                "identifier matches multiple sources"
            );
        }
        Some(Detection {
            source,
            validation,
            also_possible,
        })
    }

    /// Resolves the adapter for a request: the named source when given,
    /// otherwise auto-detection.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Unsupported`] when the named source is unknown or
    /// no adapter claims the identifier.
    pub async fn resolve(
        &self,
        id: &str,
        source: Option<&str>,
    ) -> Result<Arc<dyn Downloader>, DownloadError> {
        if let Some(name) = source {
            return self
                .get(name)
                .await
                .ok_or_else(|| DownloadError::Unsupported(name.to_string()));
        }
        let detection = self
            .detect(id)
            .await
            .ok_or_else(|| DownloadError::Unsupported(format!("no source claims '{id}'")))?;
        self.get(&detection.source)
            .await
            .ok_or_else(|| DownloadError::Unsupported(detection.source))
    }
}

/// Builds the default registry with every built-in adapter.
///
/// Registration order is specific-first so auto-detection prefers the
/// most specific source; the generic adapter is the fallback.
///
/// # Errors
///
/// Returns [`DownloadError`] when an adapter fails to construct (TLS
/// initialization) or a duplicate registration slips in.
pub async fn build_default_registry() -> Result<DownloaderRegistry, DownloadError> {
    let registry = DownloaderRegistry::new();
    registry
        .register(
            Arc::new(super::geo::GeoDownloader::from_env()?),
            &["ncbi-geo", "gds"],
        )
        .await?;
    registry
        .register(Arc::new(super::figshare::FigshareDownloader::new()?), &["fig"])
        .await?;
    registry
        .register(
            Arc::new(super::generic::GenericDownloader::new()?),
            &["url", "direct"],
        )
        .await?;
    Ok(registry)
}
