//! Request-scoped driver selection.
//!
//! A [`DriverContext`] is entered once at the start of a unit of work (usually
//! one inbound request) with [`DriverContext::scope`]. Everything awaited
//! inside the scope sees it; tasks spawned from inside do not, and neither do
//! concurrently running requests. Drivers read it on every path resolution
//! through [`PrefixResolver`].

use std::future::Future;

use crate::util;

tokio::task_local! {
    static DRIVER_CONTEXT: DriverContext;
}

/// Active driver and prefix overrides for the current unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverContext {
    driver: Option<String>,
    prefix: Option<String>,
}

impl DriverContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` the driver the manager resolves to.
    pub fn with_driver(mut self, name: impl Into<String>) -> Self {
        self.driver = Some(name.into());
        self
    }

    /// Prefix every key with `prefix`, taking precedence over configured prefixes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.prefix = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Run `future` with this context active.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        DRIVER_CONTEXT.scope(self, future).await
    }

    /// Context of the running unit of work, if one was entered.
    pub fn current() -> Option<DriverContext> {
        DRIVER_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    pub(crate) fn current_prefix() -> Option<String> {
        DRIVER_CONTEXT
            .try_with(|ctx| ctx.prefix.clone())
            .ok()
            .flatten()
    }

    pub(crate) fn current_driver() -> Option<String> {
        DRIVER_CONTEXT
            .try_with(|ctx| ctx.driver.clone())
            .ok()
            .flatten()
    }
}

/// Resolves the key prefix for a driver: context prefix first, then the
/// driver's configured one.
#[derive(Debug, Clone, Default)]
pub struct PrefixResolver {
    configured: Option<String>,
}

impl PrefixResolver {
    pub fn new(configured: Option<String>) -> Self {
        let configured = configured
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { configured }
    }

    /// Prefix in effect right now.
    pub fn resolve(&self) -> Option<String> {
        DriverContext::current_prefix().or_else(|| self.configured.clone())
    }

    /// Prepend the active prefix unless `path` already starts with it.
    pub fn apply(&self, path: &str) -> String {
        let path = util::normalize(path);
        match self.resolve() {
            None => path,
            Some(prefix) => {
                if path == prefix || path.starts_with(&format!("{}/", prefix)) {
                    path
                } else {
                    format!("{}/{}", prefix, path)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_prefix() {
        let resolver = PrefixResolver::new(Some("/tenant-a/".to_string()));
        assert_eq!(resolver.apply("x.txt"), "tenant-a/x.txt");
        assert_eq!(resolver.apply("/x.txt"), "tenant-a/x.txt");
        assert_eq!(PrefixResolver::new(None).apply("/x.txt"), "x.txt");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let resolver = PrefixResolver::new(Some("uploads".to_string()));
        let once = resolver.apply("docs/a.pdf");
        assert_eq!(resolver.apply(&once), once);
        // A path that merely shares the prefix's leading characters is still prefixed
        assert_eq!(resolver.apply("uploads2/a.pdf"), "uploads/uploads2/a.pdf");
    }

    #[tokio::test]
    async fn test_context_prefix_wins_over_configured() {
        let resolver = PrefixResolver::new(Some("static".to_string()));
        let path = DriverContext::new()
            .with_prefix("tenants/42")
            .scope(async { resolver.apply("a.txt") })
            .await;
        assert_eq!(path, "tenants/42/a.txt");
        // Outside the scope the configured prefix is back
        assert_eq!(resolver.apply("a.txt"), "static/a.txt");
    }

    #[tokio::test]
    async fn test_context_does_not_leak_across_tasks() {
        let resolver = PrefixResolver::new(None);
        let a = tokio::spawn({
            let resolver = resolver.clone();
            DriverContext::new().with_prefix("a").scope(async move {
                tokio::task::yield_now().await;
                resolver.apply("f.txt")
            })
        });
        let b = tokio::spawn({
            let resolver = resolver.clone();
            DriverContext::new().with_prefix("b").scope(async move {
                tokio::task::yield_now().await;
                resolver.apply("f.txt")
            })
        });
        assert_eq!(a.await.unwrap(), "a/f.txt");
        assert_eq!(b.await.unwrap(), "b/f.txt");

        let spawned_inside = DriverContext::new()
            .with_driver("s3")
            .scope(async { tokio::spawn(async { DriverContext::current() }).await.unwrap() })
            .await;
        assert!(spawned_inside.is_none());
    }
}
