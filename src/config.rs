use std::path::PathBuf;

use crate::parser::SegmenterConfig;

const DEFAULT_DB_PATH: &str = "data/documents.sqlite";
const DEFAULT_ASSETS_DIR: &str = "data/assets";
const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Credentials for the vision/summarization deployment.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl AiConfig {
    /// `None` unless endpoint, key and deployment are all set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        Some(Self {
            endpoint: non_empty("AZURE_OPENAI_ENDPOINT")?.trim_end_matches('/').to_string(),
            api_key: non_empty("AZURE_OPENAI_API_KEY")?,
            deployment: non_empty("AZURE_OPENAI_DEPLOYMENT")?,
            api_version: non_empty("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }

    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

/// Knobs for one run of the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    /// Images smaller than this are icons or decoration and never reach the segmenter.
    pub min_image_bytes: usize,
    pub max_sections: Option<usize>,
    pub classify_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            min_image_bytes: 5000,
            max_sections: Some(20),
            classify_concurrency: 4,
        }
    }
}

/// Process-wide settings, read once in `main` and passed down.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub assets_dir: PathBuf,
    pub ai: Option<AiConfig>,
}

impl Settings {
    pub fn from_env() -> Self {
        let path = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };
        Self {
            db_path: path("DOCSECTIONS_DB", DEFAULT_DB_PATH),
            assets_dir: path("DOCSECTIONS_ASSETS", DEFAULT_ASSETS_DIR),
            ai: AiConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn ai_config_requires_all_credentials() {
        let partial = lookup(&[("AZURE_OPENAI_ENDPOINT", "https://x.openai.azure.com")]);
        assert!(AiConfig::from_lookup(partial).is_none());

        let blank_key = lookup(&[
            ("AZURE_OPENAI_ENDPOINT", "https://x.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "  "),
            ("AZURE_OPENAI_DEPLOYMENT", "gpt-4o"),
        ]);
        assert!(AiConfig::from_lookup(blank_key).is_none());
    }

    #[test]
    fn ai_config_url() {
        let cfg = AiConfig::from_lookup(lookup(&[
            ("AZURE_OPENAI_ENDPOINT", "https://x.openai.azure.com/"),
            ("AZURE_OPENAI_API_KEY", "k"),
            ("AZURE_OPENAI_DEPLOYMENT", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_version, "2024-02-15-preview");
        assert_eq!(
            cfg.chat_completions_url(),
            "https://x.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.min_image_bytes, 5000);
        assert_eq!(cfg.max_sections, Some(20));
        assert_eq!(cfg.segmenter.page_threshold, 3);
        assert_eq!(cfg.segmenter.min_blocks_per_section, 5);
    }
}
