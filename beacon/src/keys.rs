//! Cache-key construction.
//!
//! Two logically identical requests (same path, same tenant, same query
//! parameters in any order) must always produce the same key, and
//! cache-busting parameters such as timestamp nonces must never fragment the
//! cache. Each resource therefore declares a [`KeyPolicy`] up front: which
//! query parameters participate in the key, and whether the key is scoped to
//! the effective tenant. Parameters not on the allow-list are dropped.

/// Per-resource declaration of how requests map onto cache keys.
#[derive(Clone, Copy, Debug)]
pub struct KeyPolicy {
    /// Include the caller's tenant discriminator in the key. Tenant identity
    /// comes from session state, not from the endpoint itself.
    pub tenant_scoped: bool,
    /// Query parameters that participate in key construction. Everything
    /// else (nonces, trace ids) is excluded.
    pub allowed_params: &'static [&'static str],
}

impl KeyPolicy {
    pub const fn new(tenant_scoped: bool, allowed_params: &'static [&'static str]) -> Self {
        Self {
            tenant_scoped,
            allowed_params,
        }
    }

    /// Derives the cache key for `endpoint` (path plus optional query
    /// string). Allowed parameters are re-encoded in alphabetical order so
    /// parameter order on the wire never matters.
    pub fn cache_key(&self, endpoint: &str, tenant: Option<&str>) -> String {
        let (path, query) = match endpoint.split_once('?') {
            Some((path, query)) => (path, query),
            None => (endpoint, ""),
        };

        let mut params: Vec<(&str, &str)> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .filter(|(name, _)| self.allowed_params.contains(name))
            .collect();
        params.sort_unstable();
        params.dedup();

        let canonical = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let tenant = if self.tenant_scoped {
            tenant.unwrap_or("")
        } else {
            ""
        };

        format!("{path}::{tenant}::{canonical}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DASHBOARD: KeyPolicy = KeyPolicy::new(true, &["brandId", "range", "segment"]);

    #[test]
    fn parameter_order_does_not_matter() {
        let a = DASHBOARD.cache_key("/dashboard?range=30d&brandId=b1", Some("t1"));
        let b = DASHBOARD.cache_key("/dashboard?brandId=b1&range=30d", Some("t1"));
        assert_eq!(a, b);
    }

    #[test]
    fn cache_busting_params_are_excluded() {
        let plain = DASHBOARD.cache_key("/dashboard?brandId=b1", Some("t1"));
        let busted = DASHBOARD.cache_key("/dashboard?brandId=b1&_ts=1724500000", Some("t1"));
        assert_eq!(plain, busted);
    }

    #[test]
    fn tenant_discriminator_separates_keys() {
        let t1 = DASHBOARD.cache_key("/dashboard?brandId=b1", Some("t1"));
        let t2 = DASHBOARD.cache_key("/dashboard?brandId=b1", Some("t2"));
        assert_ne!(t1, t2);
    }

    #[test]
    fn tenant_ignored_when_not_scoped() {
        let global = KeyPolicy::new(false, &["page"]);
        let a = global.cache_key("/plans?page=2", Some("t1"));
        let b = global.cache_key("/plans?page=2", None);
        assert_eq!(a, b);
    }

    #[test]
    fn query_string_is_stripped_from_path() {
        let key = DASHBOARD.cache_key("/dashboard?brandId=b1", None);
        assert!(key.starts_with("/dashboard::"));
        assert!(!key.contains('?'));
    }

    #[test]
    fn repeated_pairs_collapse() {
        let a = DASHBOARD.cache_key("/dashboard?range=7d&range=7d", None);
        let b = DASHBOARD.cache_key("/dashboard?range=7d", None);
        assert_eq!(a, b);
    }
}
