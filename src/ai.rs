//! Vision classification and summarization through an Azure OpenAI chat deployment.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::AiConfig;

const MAX_TAGS: usize = 5;
const SUMMARY_BODY_CHARS: usize = 6000;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClassification {
    pub is_important: bool,
    pub image_type: String,
    pub description: String,
    pub relevance_score: u8,
    pub tags: Vec<String>,
}

impl ImageClassification {
    /// Used when the classifier fails: keep the image rather than lose content.
    pub fn fallback(reason: &str) -> Self {
        Self {
            is_important: true,
            image_type: "unknown".to_string(),
            description: reason.to_string(),
            relevance_score: 5,
            tags: Vec::new(),
        }
    }

    /// Fields merged into the image block's metadata.
    pub fn to_metadata(&self, section_heading: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("aiClassified".into(), json!(true));
        m.insert("isImportant".into(), json!(self.is_important));
        m.insert("imageType".into(), json!(self.image_type));
        m.insert("description".into(), json!(self.description));
        m.insert("relevanceScore".into(), json!(self.relevance_score));
        m.insert("tags".into(), json!(self.tags));
        m.insert("sectionContext".into(), json!(section_heading));
        m
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub headline: String,
    pub summary: String,
}

#[async_trait]
pub trait VisionClassifier: Send + Sync {
    async fn classify(
        &self,
        image: &[u8],
        format: &str,
        section_heading: &str,
    ) -> Result<ImageClassification, AiError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, heading: &str, body: &str) -> Result<SectionSummary, AiError>;
}

pub struct AzureOpenAiClient {
    config: AiConfig,
    http: reqwest::Client,
}

impl AzureOpenAiClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { config, http })
    }

    async fn chat(&self, body: Value) -> Result<String, AiError> {
        let response = self
            .http
            .post(self.config.chat_completions_url())
            .header("api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Status { status: status.as_u16(), body: text });
        }
        first_choice_content(&text)
    }
}

#[async_trait]
impl VisionClassifier for AzureOpenAiClient {
    async fn classify(
        &self,
        image: &[u8],
        format: &str,
        section_heading: &str,
    ) -> Result<ImageClassification, AiError> {
        let content = self.chat(classification_request(image, format, section_heading)).await?;
        parse_classification(&content)
    }
}

#[async_trait]
impl Summarizer for AzureOpenAiClient {
    async fn summarize(&self, heading: &str, body: &str) -> Result<SectionSummary, AiError> {
        let content = self.chat(summary_request(heading, body)).await?;
        parse_summary(&content)
    }
}

fn classification_request(image: &[u8], format: &str, section_heading: &str) -> Value {
    let prompt = format!(
        "You are analyzing an image from an educational/training PDF.\n\
         CONTEXT: the image appears in a section about: \"{section_heading}\"\n\n\
         Decide whether the image is IMPORTANT for learning. Diagrams, charts, flowcharts, \
         tables, screenshots, infographics, maps and any graphic with text labels are important. \
         Only small icons, logos, borders and background patterns without text are decorative. \
         When uncertain, treat the image as important.\n\n\
         Return ONLY valid JSON:\n\
         {{\"is_important\": true|false, \"image_type\": \"...\", \"description\": \"...\", \
         \"relevance_score\": 1-10, \"tags\": [\"...\"]}}"
    );
    json!({
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/{};base64,{}", format, STANDARD.encode(image)),
                        "detail": "low"
                    }
                }
            ]
        }],
        "max_tokens": 300,
        "temperature": 0.3
    })
}

fn summary_request(heading: &str, body: &str) -> Value {
    let body: String = body.chars().take(SUMMARY_BODY_CHARS).collect();
    let prompt = format!(
        "Section heading: \"{heading}\"\n\nSection text:\n{body}\n\n\
         Write a short, engaging headline (at most 12 words) and a summary of 3-5 lines, \
         one point per line. Return ONLY valid JSON: {{\"headline\": \"...\", \"summary\": \"...\"}}"
    );
    json!({
        "messages": [
            { "role": "system", "content": "You summarize sections of training material for learners." },
            { "role": "user", "content": prompt }
        ],
        "max_tokens": 400,
        "temperature": 0.3
    })
}

fn first_choice_content(response: &str) -> Result<String, AiError> {
    let value: Value = serde_json::from_str(response)
        .map_err(|e| AiError::InvalidResponse(format!("not JSON: {e}")))?;
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| AiError::InvalidResponse("no message content in first choice".into()))
}

/// Strip a surrounding ``` or ```json fence if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub fn parse_classification(content: &str) -> Result<ImageClassification, AiError> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        is_important: bool,
        image_type: Option<String>,
        #[serde(default)]
        description: String,
        relevance_score: Option<f64>,
        #[serde(default)]
        tags: Vec<String>,
    }

    let raw: Raw = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| AiError::InvalidResponse(format!("classification: {e}")))?;
    let mut tags = raw.tags;
    tags.truncate(MAX_TAGS);
    Ok(ImageClassification {
        is_important: raw.is_important,
        image_type: raw.image_type.unwrap_or_else(|| "unknown".to_string()),
        description: raw.description,
        relevance_score: raw.relevance_score.unwrap_or(5.0).round().clamp(0.0, 10.0) as u8,
        tags,
    })
}

pub fn parse_summary(content: &str) -> Result<SectionSummary, AiError> {
    let summary: SectionSummary = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| AiError::InvalidResponse(format!("summary: {e}")))?;
    if summary.headline.trim().is_empty() {
        return Err(AiError::InvalidResponse("summary: empty headline".into()));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_from_fenced_json() {
        let content = "```json\n{\"is_important\": true, \"image_type\": \"bar chart\", \
                       \"description\": \"Sales by region\", \"relevance_score\": 14, \
                       \"tags\": [\"a\",\"b\",\"c\",\"d\",\"e\",\"f\"]}\n```";
        let c = parse_classification(content).unwrap();
        assert!(c.is_important);
        assert_eq!(c.image_type, "bar chart");
        assert_eq!(c.relevance_score, 10);
        assert_eq!(c.tags.len(), 5);
    }

    #[test]
    fn classification_defaults_missing_fields() {
        let c = parse_classification("{\"is_important\": false}").unwrap();
        assert!(!c.is_important);
        assert_eq!(c.image_type, "unknown");
        assert_eq!(c.relevance_score, 5);
        assert!(c.tags.is_empty());
    }

    #[test]
    fn classification_rejects_prose() {
        assert!(matches!(
            parse_classification("This is a decorative border."),
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn negative_score_clamped() {
        let c = parse_classification("{\"is_important\": true, \"relevance_score\": -3}").unwrap();
        assert_eq!(c.relevance_score, 0);
    }

    #[test]
    fn summary_parsing() {
        let s = parse_summary("```\n{\"headline\": \"Stay Safe\", \"summary\": \"line one\\nline two\"}\n```").unwrap();
        assert_eq!(s.headline, "Stay Safe");
        assert_eq!(s.summary.lines().count(), 2);
        assert!(parse_summary("{\"headline\": \" \", \"summary\": \"x\"}").is_err());
    }

    #[test]
    fn first_choice_extraction() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  {\"a\":1} "}}]}"#;
        assert_eq!(first_choice_content(body).unwrap(), "{\"a\":1}");
        assert!(first_choice_content(r#"{"choices":[]}"#).is_err());
        assert!(first_choice_content("<html>").is_err());
    }

    #[test]
    fn classification_request_embeds_image_and_context() {
        let body = classification_request(&[1, 2, 3], "png", "1. Wiring");
        let parts = &body["messages"][0]["content"];
        assert!(parts[0]["text"].as_str().unwrap().contains("1. Wiring"));
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(parts[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn summary_request_truncates_body() {
        let long = "x".repeat(SUMMARY_BODY_CHARS * 2);
        let body = summary_request("Intro", &long);
        let prompt = body["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.len() < SUMMARY_BODY_CHARS + 500);
    }

    #[test]
    fn metadata_fields() {
        let m = ImageClassification::fallback("Classification error").to_metadata("1. Intro");
        assert_eq!(m["isImportant"], json!(true));
        assert_eq!(m["imageType"], json!("unknown"));
        assert_eq!(m["relevanceScore"], json!(5));
        assert_eq!(m["sectionContext"], json!("1. Intro"));
    }
}
