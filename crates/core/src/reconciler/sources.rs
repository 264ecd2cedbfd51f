use std::collections::HashMap;

use crate::config::SourceConfig;

/// Callback URLs of the registered sources, keyed by source name.
///
/// Built once at startup and shared read-only by every worker.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    urls: HashMap<String, String>,
}

impl SourceRegistry {
    pub fn new<I, N, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, U)>,
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            urls: entries
                .into_iter()
                .map(|(name, url)| (name.into(), url.into()))
                .collect(),
        }
    }

    pub fn from_config(sources: &[SourceConfig]) -> Self {
        Self::new(sources.iter().map(|s| (s.name.clone(), s.url.clone())))
    }

    /// Callback URL for `source`, if registered.
    pub fn url_for(&self, source: &str) -> Option<&str> {
        self.urls.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = SourceRegistry::from_config(&[SourceConfig {
            name: "sberapi".to_string(),
            url: "http://sber/cb".to_string(),
        }]);
        assert_eq!(registry.url_for("sberapi"), Some("http://sber/cb"));
        assert_eq!(registry.url_for("portal"), None);
        assert_eq!(registry.url_for(""), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_registry() {
        let registry = SourceRegistry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.url_for("sberapi"), None);
    }
}
