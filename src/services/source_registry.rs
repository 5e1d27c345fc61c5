use serde::Deserialize;
use tracing::warn;

// ==============================================================================
// Source Catalog
// ==============================================================================

/// How articles are pulled from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTransport {
    /// RSS or Atom feed at a fixed URL.
    Feed { url: String },
    /// Supplemental search API; requires an API key at runtime.
    NewsSearchApi { provider: String },
}

#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub layer: u8,
    pub transport: SourceTransport,
    pub quality_score: f64,
}

/// Static catalog of news sources in three layers. L1 wire feeds carry a
/// quality of 1.0, L2 aggregators 0.75-0.90, L3 supplemental APIs 0.60.
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: default_sources(),
        }
    }

    /// Build the registry, applying any `SOURCE_FEED_OVERRIDES` from the
    /// environment (JSON list of `{name, layer, url, quality}`).
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        if let Ok(raw) = std::env::var("SOURCE_FEED_OVERRIDES") {
            match serde_json::from_str::<Vec<SourceOverride>>(&raw) {
                Ok(overrides) => {
                    for o in overrides {
                        registry.apply_override(o);
                    }
                }
                Err(e) => warn!("Ignoring malformed SOURCE_FEED_OVERRIDES: {}", e),
            }
        }
        registry
    }

    fn apply_override(&mut self, o: SourceOverride) {
        let quality = o.quality.clamp(0.0, 1.0);
        if let Some(existing) = self.sources.iter_mut().find(|s| s.name == o.name) {
            existing.layer = o.layer;
            existing.transport = SourceTransport::Feed { url: o.url };
            existing.quality_score = quality;
        } else {
            self.sources.push(Source {
                name: o.name,
                layer: o.layer,
                transport: SourceTransport::Feed { url: o.url },
                quality_score: quality,
            });
        }
    }

    /// Sources for one layer, in declaration order.
    pub fn layer(&self, layer: u8) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.layer == layer).collect()
    }

    pub fn all(&self) -> &[Source] {
        &self.sources
    }

    pub fn quality(&self, source_name: &str) -> f64 {
        self.sources
            .iter()
            .find(|s| s.name == source_name)
            .map(|s| s.quality_score)
            .unwrap_or(0.5)
    }

    /// Tier of a source for news-alert gating. Unknown sources report tier 0
    /// and are dropped by every sensitivity level.
    pub fn tier(&self, source_name: &str) -> i32 {
        self.sources
            .iter()
            .find(|s| s.name == source_name)
            .map(|s| s.layer as i32)
            .unwrap_or(0)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SourceOverride {
    name: String,
    layer: u8,
    url: String,
    #[serde(default = "default_override_quality")]
    quality: f64,
}

fn default_override_quality() -> f64 {
    0.75
}

fn default_sources() -> Vec<Source> {
    vec![
        // L1 wire feeds
        Source {
            name: "Reuters".to_string(),
            layer: 1,
            transport: SourceTransport::Feed {
                url: "https://feeds.reuters.com/reuters/businessNews".to_string(),
            },
            quality_score: 1.0,
        },
        Source {
            name: "AP Business".to_string(),
            layer: 1,
            transport: SourceTransport::Feed {
                url: "https://feedx.net/rss/ap.xml".to_string(),
            },
            quality_score: 1.0,
        },
        Source {
            name: "Bloomberg Markets".to_string(),
            layer: 1,
            transport: SourceTransport::Feed {
                url: "https://feeds.bloomberg.com/markets/news.rss".to_string(),
            },
            quality_score: 1.0,
        },
        // L2 aggregators
        Source {
            name: "CNBC".to_string(),
            layer: 2,
            transport: SourceTransport::Feed {
                url: "https://www.cnbc.com/id/100003114/device/rss/rss.html".to_string(),
            },
            quality_score: 0.85,
        },
        Source {
            name: "MarketWatch".to_string(),
            layer: 2,
            transport: SourceTransport::Feed {
                url: "https://feeds.marketwatch.com/marketwatch/topstories/".to_string(),
            },
            quality_score: 0.80,
        },
        Source {
            name: "Yahoo Finance".to_string(),
            layer: 2,
            transport: SourceTransport::Feed {
                url: "https://feeds.finance.yahoo.com/rss/2.0/headline".to_string(),
            },
            quality_score: 0.75,
        },
        // L3 supplemental APIs
        Source {
            name: "AlphaVantage News".to_string(),
            layer: 3,
            transport: SourceTransport::NewsSearchApi {
                provider: "alphavantage".to_string(),
            },
            quality_score: 0.60,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_are_populated() {
        let registry = SourceRegistry::new();
        assert!(!registry.layer(1).is_empty());
        assert!(!registry.layer(2).is_empty());
        assert!(!registry.layer(3).is_empty());
    }

    #[test]
    fn test_quality_matches_layer_bands() {
        let registry = SourceRegistry::new();
        for s in registry.layer(1) {
            assert_eq!(s.quality_score, 1.0);
        }
        for s in registry.layer(2) {
            assert!(s.quality_score >= 0.75 && s.quality_score <= 0.90);
        }
        for s in registry.layer(3) {
            assert_eq!(s.quality_score, 0.60);
        }
    }

    #[test]
    fn test_tier_lookup() {
        let registry = SourceRegistry::new();
        assert_eq!(registry.tier("Reuters"), 1);
        assert_eq!(registry.tier("CNBC"), 2);
        assert_eq!(registry.tier("AlphaVantage News"), 3);
        assert_eq!(registry.tier("Some Blog"), 0);
    }

    #[test]
    fn test_unknown_source_quality_defaults() {
        let registry = SourceRegistry::new();
        assert_eq!(registry.quality("Some Blog"), 0.5);
    }
}
