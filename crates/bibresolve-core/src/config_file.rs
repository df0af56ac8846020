//! On-disk TOML configuration overlay.
//!
//! All fields are optional so partial configs work: file values are applied
//! over [`ResolverConfig::default()`], absent values fall through.

use std::path::Path;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ResolverConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub scoring: Option<ScoringConfig>,
    pub backend: Option<BackendConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub min_score_per_evidence: Option<f64>,
    pub author_fuzzy_threshold: Option<f64>,
    pub first_author_missing_discount: Option<f64>,
    pub bibstem_min_score: Option<f64>,
    pub fuzzy_year_window: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub row_cap: Option<usize>,
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Load config from an explicit path, falling back to `.bibresolve.toml`
/// in the working directory.
pub fn load_config(explicit: Option<&Path>) -> ConfigFile {
    match explicit {
        Some(path) => load_from_path(path).unwrap_or_default(),
        None => load_from_path(Path::new(".bibresolve.toml")).unwrap_or_default(),
    }
}

impl ConfigFile {
    /// Apply every present value over `config`.
    pub fn apply(&self, config: &mut ResolverConfig) {
        if let Some(scoring) = &self.scoring {
            if let Some(v) = scoring.min_score_per_evidence {
                config.min_score_per_evidence = v;
            }
            if let Some(v) = scoring.author_fuzzy_threshold {
                config.author_fuzzy_threshold = v;
            }
            if let Some(v) = scoring.first_author_missing_discount {
                config.first_author_missing_discount = v;
            }
            if let Some(v) = scoring.bibstem_min_score {
                config.bibstem_min_score = v;
            }
            if let Some(v) = scoring.fuzzy_year_window {
                config.fuzzy_year_window = v;
            }
        }
        if let Some(backend) = &self.backend {
            if let Some(v) = backend.timeout_secs {
                config.backend_timeout = Duration::from_secs(v);
            }
            if let Some(v) = backend.row_cap {
                config.row_cap = v;
            }
        }
    }

    /// Backend URL from the file, if any; the CLI flag still wins.
    pub fn backend_url(&self) -> Option<&str> {
        self.backend.as_ref().and_then(|b| b.url.as_deref())
    }
}
