//! External image analyzer port and the Azure AI Vision adapter

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::AnalyzerSettings;
use crate::error::{AnalysisError, ConfigError};

const API_VERSION: &str = "2023-10-01";
const ANALYZE_PATH: &str = "computervision/imageanalysis:analyze";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Analysis features the upload pipeline asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualFeature {
    Caption,
    Read,
    Tags,
    Objects,
}

impl VisualFeature {
    pub fn as_str(self) -> &'static str {
        match self {
            VisualFeature::Caption => "caption",
            VisualFeature::Read => "read",
            VisualFeature::Tags => "tags",
            VisualFeature::Objects => "objects",
        }
    }
}

impl fmt::Display for VisualFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every feature is requested in a single round trip.
pub const UPLOAD_FEATURES: [VisualFeature; 4] = [
    VisualFeature::Caption,
    VisualFeature::Read,
    VisualFeature::Tags,
    VisualFeature::Objects,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    /// In [0, 1]
    pub confidence: f64,
}

/// Axis-aligned box in pixels of the original image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub bounding_box: BoundingBox,
    /// Best label for the object, if the analyzer gave one
    pub label: Option<Tag>,
}

/// What the analyzer reports for one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    pub caption: String,
    pub tags: Vec<Tag>,
    /// `None` when the analyzer returned no object section at all
    pub objects: Option<Vec<DetectedObject>>,
    /// Lines found by text recognition, in reading order
    pub text_lines: Vec<String>,
}

impl AnalysisResult {
    pub fn object_count(&self) -> usize {
        self.objects.as_ref().map_or(0, Vec::len)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Submit image bytes and get back caption, tags and object boxes.
    async fn analyze(
        &self,
        image: Bytes,
        features: &[VisualFeature],
    ) -> Result<AnalysisResult, AnalysisError>;
}

// --- Azure Image Analysis 4.0 wire format ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    caption_result: Option<CaptionResult>,
    tags_result: Option<TagsResult>,
    objects_result: Option<ObjectsResult>,
    read_result: Option<ReadResult>,
}

#[derive(Deserialize)]
struct CaptionResult {
    text: String,
}

#[derive(Deserialize)]
struct TagsResult {
    #[serde(default)]
    values: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct ObjectsResult {
    #[serde(default)]
    values: Vec<ObjectEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectEntry {
    bounding_box: BoxEntry,
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct BoxEntry {
    x: i32,
    y: i32,
    w: u32,
    h: u32,
}

#[derive(Deserialize)]
struct ReadResult {
    #[serde(default)]
    blocks: Vec<ReadBlock>,
}

#[derive(Deserialize)]
struct ReadBlock {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Deserialize)]
struct ReadLine {
    text: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl From<TagEntry> for Tag {
    fn from(entry: TagEntry) -> Self {
        Tag {
            name: entry.name,
            confidence: entry.confidence,
        }
    }
}

impl From<AnalyzeResponse> for AnalysisResult {
    fn from(response: AnalyzeResponse) -> Self {
        let caption = response
            .caption_result
            .map(|c| c.text)
            .unwrap_or_default();

        let tags = response
            .tags_result
            .map(|t| t.values.into_iter().map(Tag::from).collect())
            .unwrap_or_default();

        let objects = response.objects_result.map(|o| {
            o.values
                .into_iter()
                .map(|entry| DetectedObject {
                    bounding_box: BoundingBox {
                        x: entry.bounding_box.x,
                        y: entry.bounding_box.y,
                        width: entry.bounding_box.w,
                        height: entry.bounding_box.h,
                    },
                    label: entry.tags.into_iter().next().map(Tag::from),
                })
                .collect()
        });

        let text_lines = response
            .read_result
            .map(|r| {
                r.blocks
                    .into_iter()
                    .flat_map(|block| block.lines)
                    .map(|line| line.text)
                    .collect()
            })
            .unwrap_or_default();

        AnalysisResult {
            caption,
            tags,
            objects,
            text_lines,
        }
    }
}

/// Client for the Azure AI Vision image analysis REST API
pub struct AzureVisionClient {
    client: Client,
    analyze_url: Url,
    key: String,
    language: String,
    gender_neutral_caption: bool,
}

impl AzureVisionClient {
    pub fn new(settings: AnalyzerSettings) -> Result<Self, ConfigError> {
        let endpoint = settings.endpoint.trim().trim_end_matches('/');
        let analyze_url = Url::parse(&format!("{}/{}", endpoint, ANALYZE_PATH))
            .map_err(|e| ConfigError::InvalidEndpoint(settings.endpoint.clone(), e.to_string()))?;
        if !matches!(analyze_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint(
                settings.endpoint,
                "expected an http or https URL".to_string(),
            ));
        }

        if settings.key.trim().is_empty() {
            return Err(ConfigError::EmptyKey);
        }

        let client = Client::builder().build()?;

        info!("Vision client configured: endpoint={}", endpoint);

        Ok(Self {
            client,
            analyze_url,
            key: settings.key,
            language: settings.language,
            gender_neutral_caption: settings.gender_neutral_caption,
        })
    }

    pub fn analyze_url(&self) -> &Url {
        &self.analyze_url
    }
}

#[async_trait]
impl Analyzer for AzureVisionClient {
    async fn analyze(
        &self,
        image: Bytes,
        features: &[VisualFeature],
    ) -> Result<AnalysisResult, AnalysisError> {
        let features = features
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let gender_neutral = self.gender_neutral_caption.to_string();
        let start = Instant::now();

        debug!("Sending {} bytes to analyzer (features={})", image.len(), features);

        let response = self
            .client
            .post(self.analyze_url.clone())
            .query(&[
                ("api-version", API_VERSION),
                ("features", features.as_str()),
                ("language", self.language.as_str()),
                ("gender-neutral-caption", gender_neutral.as_str()),
            ])
            .header(KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        debug!(
            "Analyzer answered {} in {}ms",
            status,
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) => (
                    status.as_u16().to_string(),
                    body.chars().take(500).collect(),
                ),
            };
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: AnalyzeResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

        Ok(parsed.into())
    }
}
