use crate::error::Error;
use async_trait::async_trait;
use jit_groups_lazy::Lazy;
use jit_groups_policy::document::PolicyError;
use jit_groups_policy::policy::EnvironmentPolicy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Environment summary, available without loading the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHeader {
    pub name: String,
    pub description: String,
}

/// Capability that yields policy documents.
///
/// `environments` is cheap and called on every listing; `load_policy` may
/// hit storage and is cached by the [`PolicyStore`].
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn environments(&self) -> Vec<EnvironmentHeader>;

    async fn load_policy(&self, environment: &str) -> Result<EnvironmentPolicy, PolicyError>;
}

/// Process-wide cache of environment policies.
///
/// Each environment sits behind an opportunistic [`Lazy`] with a TTL: a
/// load failure leaves the slot uninitialized so the next access retries,
/// and a loaded policy is discarded once the TTL elapses.
pub struct PolicyStore {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    cache: RwLock<HashMap<String, Arc<Lazy<Arc<EnvironmentPolicy>, PolicyError>>>>,
}

impl PolicyStore {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn environments(&self) -> Vec<EnvironmentHeader> {
        self.source.environments()
    }

    /// Loads the policy for `environment`, serving repeated requests from
    /// the cache. `Ok(None)` when the source does not know the
    /// environment.
    pub async fn policy(&self, environment: &str) -> Result<Option<Arc<EnvironmentPolicy>>, Error> {
        if !self
            .source
            .environments()
            .iter()
            .any(|h| h.name == environment)
        {
            return Ok(None);
        }
        let lazy = self.entry(environment);
        match lazy.get().await {
            Ok(policy) => Ok(Some(policy)),
            Err(e) => {
                debug!(environment, error = %e, "policy load failed");
                Err(e.into())
            }
        }
    }

    fn entry(&self, environment: &str) -> Arc<Lazy<Arc<EnvironmentPolicy>, PolicyError>> {
        if let Some(entry) = self.cache.read().unwrap().get(environment) {
            return entry.clone();
        }
        let mut cache = self.cache.write().unwrap();
        cache
            .entry(environment.to_string())
            .or_insert_with(|| {
                let source = self.source.clone();
                let name = environment.to_string();
                Arc::new(
                    Lazy::opportunistic(move || {
                        let source = source.clone();
                        let name = name.clone();
                        async move {
                            let policy = source.load_policy(&name).await?;
                            policy.validate()?;
                            Ok(Arc::new(policy))
                        }
                    })
                    .reinitialize_after(self.ttl),
                )
            })
            .clone()
    }
}
