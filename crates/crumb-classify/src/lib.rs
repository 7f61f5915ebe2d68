//! Cookie, script and tracker classification.
//!
//! All tables live in [`rules::RuleSet`], loaded from TOML. [`Classifier`]
//! ties the rules to a [`ProviderCache`] so provider lookups are memoized.
//! Classification never fails: unmatched input is labelled unknown.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cache;
pub mod cookie;
pub mod error;
pub mod provider;
pub mod rules;
pub mod script;
pub mod tracker;

pub use cache::{MemoryCache, ProviderCache, ProviderLookup};
pub use error::{ClassifyError, Result};
pub use rules::RuleSet;

use crumb_core::model::{CookieCategory, ObservedCookie, ScriptFinding};
use crumb_core::ClassificationConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Shared classification facade.
#[derive(Clone)]
pub struct Classifier {
    rules: Arc<RuleSet>,
    cache: Arc<dyn ProviderCache>,
    ttl: Duration,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    pub fn new(rules: RuleSet, cache: Arc<dyn ProviderCache>, ttl: Duration) -> Self {
        Self {
            rules: Arc::new(rules),
            cache,
            ttl,
        }
    }

    /// Rules from config (or the embedded defaults) with an in-memory cache.
    pub fn from_config(config: &ClassificationConfig) -> Result<Self> {
        let rules = RuleSet::load(config.rules_path.as_deref())?;
        Ok(Self::new(
            rules,
            Arc::new(MemoryCache::new()),
            Duration::from_secs(config.provider_cache_ttl_hours * 3600),
        ))
    }

    /// Embedded rules with a 24 hour in-memory cache.
    pub fn with_defaults() -> Result<Self> {
        Self::from_config(&ClassificationConfig::default())
    }

    /// Evict expired provider lookups from the cache.
    pub async fn purge_cache(&self) -> usize {
        let removed = self.cache.purge_expired().await;
        if removed > 0 {
            debug!(removed, "Purged expired provider lookups");
        }
        removed
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn cookie_category(&self, name: &str, http_only: bool, secure: bool) -> CookieCategory {
        cookie::categorize(&self.rules, name, http_only, secure)
    }

    /// Provider for a cookie, memoized by name and domain.
    pub async fn cookie_provider(&self, name: &str, domain: &str, value: &str) -> Option<String> {
        let key = format!("cookie:{name}@{}", domain.trim_start_matches('.'));
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }
        let resolved = provider::resolve(&self.rules, name, domain, value).map(|(name, source)| {
            trace!(provider = name, ?source, "Resolved cookie provider");
            name.to_string()
        });
        self.cache.set(&key, resolved.clone(), self.ttl).await;
        resolved
    }

    /// Fill in category and provider of an observed cookie.
    pub async fn classify_cookie(&self, cookie: &mut ObservedCookie) {
        cookie.category = self.cookie_category(&cookie.name, cookie.http_only, cookie.secure);
        cookie.provider = self
            .cookie_provider(&cookie.name, &cookie.domain, &cookie.value)
            .await;
    }

    pub fn script_category(&self, src: Option<&str>, content: Option<&str>) -> String {
        script::categorize(&self.rules, src, content)
    }

    /// Provider for a script, memoized by script identity.
    pub async fn script_provider(&self, src: Option<&str>, host: Option<&str>) -> Option<String> {
        let key = script::identity(src, None);
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }
        let resolved = host
            .and_then(|h| provider::by_domain(&self.rules, h))
            .map(str::to_string);
        self.cache.set(&key, resolved.clone(), self.ttl).await;
        resolved
    }

    /// Fill in category and provider of a script finding.
    pub async fn classify_script(&self, script: &mut ScriptFinding, content: Option<&str>) {
        script.category = self.script_category(script.src.as_deref(), content);
        if script.src.is_some() {
            script.provider = self
                .script_provider(script.src.as_deref(), script.host.as_deref())
                .await;
        }
    }

    pub fn tracker_type(&self, url: &str) -> Option<&str> {
        tracker::tracker_type(&self.rules, url)
    }

    pub fn is_tracking_storage_key(&self, key: &str) -> bool {
        tracker::is_tracking_storage_key(&self.rules, key)
    }
}
