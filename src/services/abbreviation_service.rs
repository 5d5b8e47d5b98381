use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ExpansionConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Turns an abbreviation such as `Inds.` into its long form.
#[async_trait]
pub trait TextExpander: Send + Sync {
    async fn expand(&self, abbreviation: &str) -> Result<String, ExpansionError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneratePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: GenerateContent,
}

/// Gemini `generateContent` client.
pub struct GeminiExpander {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiExpander {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, ExpansionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExpansionError::Network(e.to_string()))?;
        Ok(Self { api_key, model, client })
    }
}

#[async_trait]
impl TextExpander for GeminiExpander {
    async fn expand(&self, abbreviation: &str) -> Result<String, ExpansionError> {
        let prompt = format!(
            "Expand the company-related abbreviation '{}' into its full form. Return only the expansion, no explanation.",
            abbreviation
        );
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExpansionError::Timeout
                } else {
                    ExpansionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == 429 {
            return Err(ExpansionError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExpansionError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExpansionError::InvalidResponse(e.to_string()))?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ExpansionError::InvalidResponse("no candidate text".into()))
    }
}

/// Expands abbreviations in company names, caching every answer.
///
/// A failed lookup is cached as an empty string so each abbreviation costs
/// at most one call per process; names containing it stay unexpanded.
pub struct AbbreviationService {
    expander: Option<Arc<dyn TextExpander>>,
    cache: DashMap<String, String>,
    cache_file: Option<PathBuf>,
}

impl AbbreviationService {
    pub fn new(expander: Option<Arc<dyn TextExpander>>, cache_file: Option<PathBuf>) -> Self {
        Self {
            expander,
            cache: DashMap::new(),
            cache_file,
        }
    }

    /// Build from config: Gemini when an API key is present, otherwise only
    /// cached expansions are applied.
    pub async fn from_config(config: &ExpansionConfig) -> Self {
        let expander: Option<Arc<dyn TextExpander>> = match &config.api_key {
            Some(key) => match GeminiExpander::new(key.clone(), config.model.clone(), config.timeout) {
                Ok(gemini) => Some(Arc::new(gemini)),
                Err(e) => {
                    warn!("⚠️ Text expansion disabled, client setup failed: {}", e);
                    None
                }
            },
            None => None,
        };

        let service = Self::new(expander, config.cache_file.clone());
        service.load_cache().await;
        service
    }

    pub fn insert(&self, abbreviation: &str, expansion: &str) {
        self.cache.insert(abbreviation.to_string(), expansion.to_string());
    }

    pub fn cached(&self, abbreviation: &str) -> Option<String> {
        self.cache
            .get(abbreviation)
            .map(|v| v.value().clone())
            .filter(|v| !v.is_empty())
    }

    async fn load_cache(&self) {
        let Some(path) = &self.cache_file else {
            return;
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => {
                    info!("Loaded {} cached abbreviations from {}", map.len(), path.display());
                    for (abbreviation, expansion) in map {
                        self.cache.insert(abbreviation, expansion);
                    }
                }
                Err(e) => warn!("⚠️ Ignoring unreadable abbreviation cache {}: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No abbreviation cache at {}, starting fresh", path.display());
            }
            Err(e) => warn!("⚠️ Failed to read abbreviation cache {}: {}", path.display(), e),
        }
    }

    async fn save_cache(&self) {
        let Some(path) = &self.cache_file else {
            return;
        };
        let snapshot: BTreeMap<String, String> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("⚠️ Failed to serialize abbreviation cache: {}", e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!("⚠️ Failed to write abbreviation cache {}: {}", path.display(), e);
        }
    }

    /// Words ending in `.` are treated as abbreviations.
    pub fn extract_abbreviations<'a, I>(names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .flat_map(str::split_whitespace)
            .filter(|w| w.len() > 1 && w.ends_with('.'))
            .map(str::to_string)
            .collect()
    }

    /// Replace known abbreviations word by word.
    pub fn apply(&self, name: &str) -> String {
        name.split_whitespace()
            .map(|word| self.cached(word).unwrap_or_else(|| word.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve every abbreviation found in `names`, then return the names
    /// with expansions applied, in input order. Never fails.
    pub async fn expand_names(&self, names: &[String]) -> Vec<String> {
        let abbreviations = Self::extract_abbreviations(names.iter().map(String::as_str));
        let unknown: Vec<String> = abbreviations
            .into_iter()
            .filter(|a| !self.cache.contains_key(a))
            .collect();

        if let Some(expander) = &self.expander {
            if !unknown.is_empty() {
                info!("Found {} new abbreviations to expand", unknown.len());
            }
            let mut degraded = 0usize;
            for abbreviation in &unknown {
                match expander.expand(abbreviation).await {
                    Ok(expansion) => {
                        info!("✅ {} → {}", abbreviation, expansion);
                        self.cache.insert(abbreviation.clone(), expansion);
                    }
                    Err(e) => {
                        warn!("⚠️ Enrichment degraded for '{}': {}", abbreviation, e);
                        self.cache.insert(abbreviation.clone(), String::new());
                        degraded += 1;
                    }
                }
            }
            if !unknown.is_empty() {
                if degraded > 0 {
                    warn!("{} of {} abbreviations left unexpanded", degraded, unknown.len());
                }
                self.save_cache().await;
            }
        } else if !unknown.is_empty() {
            info!("Text expansion disabled, {} abbreviations left as-is", unknown.len());
        }

        names.iter().map(|n| self.apply(n)).collect()
    }
}
