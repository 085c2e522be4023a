//! The upload pipeline: validate, analyze, format tags, annotate, encode

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, Tag, UPLOAD_FEATURES};
use crate::codec::{annotate, ImageCodec};
use crate::config::HandlerSettings;
use crate::error::{AnalysisError, EncodeError, UploadError};

/// What the page and the JSON API show for one upload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub caption: String,
    /// `"<name> <confidence>%"`, in analyzer order
    pub tags: Vec<String>,
    /// Base64 PNG of the annotated image. Full resolution unless a thumbnail size is configured.
    pub thumbnail_image: String,
    /// Recognised text lines
    #[serde(default)]
    pub text: Vec<String>,
}

/// Confidence in [0, 1] as a percentage with at most two decimals.
///
/// Ties round away from zero and trailing zeros are dropped, so `0.5`
/// becomes `"50"` and `0.8675` becomes `"86.75"`.
pub fn format_percent(confidence: f64) -> String {
    let hundredths = (confidence * 10_000.0).round();
    let fixed = format!("{:.2}", hundredths / 100.0);
    fixed
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

pub fn format_tag(tag: &Tag) -> String {
    format!("{} {}%", tag.name, format_percent(tag.confidence))
}

pub struct UploadHandler {
    analyzer: Arc<dyn Analyzer>,
    codec: Arc<dyn ImageCodec>,
    settings: HandlerSettings,
}

impl UploadHandler {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        codec: Arc<dyn ImageCodec>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            analyzer,
            codec,
            settings,
        }
    }

    /// Run one upload through the whole pipeline.
    ///
    /// `None` or an empty payload fails validation before anything else runs.
    /// The payload is decoded before the analyzer is called, so an
    /// undecodable upload never costs an analyzer round trip.
    pub async fn handle(&self, payload: Option<Bytes>) -> Result<UploadResponse, UploadError> {
        let start = Instant::now();
        let image = payload
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(UploadError::empty_upload)?;

        debug!("Upload received: {} bytes", image.len());

        let canvas = self.codec.decode(&image)?;
        debug!("Decoded {}x{} image", canvas.width(), canvas.height());

        let timeout = self.settings.analyzer_timeout;
        let analysis_start = Instant::now();
        let analysis =
            match tokio::time::timeout(timeout, self.analyzer.analyze(image, &UPLOAD_FEATURES))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::Timeout(timeout)),
            }
            .map_err(|e| {
                warn!("Image analysis failed: {}", e);
                e
            })?;

        info!(
            "Analysis done in {}ms: {} tags, {} objects, {} text lines",
            analysis_start.elapsed().as_millis(),
            analysis.tags.len(),
            analysis.object_count(),
            analysis.text_lines.len()
        );

        let tags = analysis.tags.iter().map(format_tag).collect();
        let objects = analysis.objects.unwrap_or_default();

        let codec = Arc::clone(&self.codec);
        let thumbnail_size = self.settings.thumbnail_size;
        let png = tokio::task::spawn_blocking(move || {
            let mut canvas = canvas;
            annotate(codec.as_ref(), &mut canvas, &objects);
            if let Some(max_side) = thumbnail_size {
                canvas = codec.resize_to_fit(canvas, max_side);
            }
            codec.encode_png(&canvas)
        })
        .await
        .map_err(|e| EncodeError(format!("render task failed: {}", e)))??;

        info!(
            "Upload processed in {}ms ({} bytes of PNG)",
            start.elapsed().as_millis(),
            png.len()
        );

        Ok(UploadResponse {
            caption: analysis.caption,
            tags,
            thumbnail_image: general_purpose::STANDARD.encode(png),
            text: analysis.text_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisResult, BoundingBox, DetectedObject, MockAnalyzer, VisualFeature};
    use crate::codec::{RasterCodec, STROKE_COLOR};
    use crate::error::DecodeError;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn png(width: u32, height: u32) -> Bytes {
        let canvas = RgbaImage::from_pixel(width, height, WHITE);
        Bytes::from(RasterCodec.encode_png(&canvas).unwrap())
    }

    fn tag(name: &str, confidence: f64) -> Tag {
        Tag {
            name: name.to_string(),
            confidence,
        }
    }

    fn object(x: i32, y: i32, width: u32, height: u32) -> DetectedObject {
        DetectedObject {
            bounding_box: BoundingBox {
                x,
                y,
                width,
                height,
            },
            label: None,
        }
    }

    fn handler_with(analyzer: impl Analyzer + 'static) -> UploadHandler {
        UploadHandler::new(
            Arc::new(analyzer),
            Arc::new(RasterCodec),
            HandlerSettings::default(),
        )
    }

    fn analyzer_returning(result: AnalysisResult) -> MockAnalyzer {
        let mut mock = MockAnalyzer::new();
        mock.expect_analyze()
            .times(1)
            .returning(move |image, features| {
                assert!(!image.is_empty());
                assert_eq!(features, &UPLOAD_FEATURES[..]);
                Ok(result.clone())
            });
        mock
    }

    fn decode_output(response: &UploadResponse) -> RgbaImage {
        let bytes = general_purpose::STANDARD
            .decode(&response.thumbnail_image)
            .unwrap();
        RasterCodec.decode(&bytes).unwrap()
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.8675), "86.75");
        assert_eq!(format_percent(0.5), "50");
        assert_eq!(format_percent(0.123), "12.3");
        assert_eq!(format_percent(1.0), "100");
        assert_eq!(format_percent(0.0), "0");
        assert_eq!(format_percent(0.99999), "100");
    }

    #[test]
    fn test_format_percent_rounds_ties_away_from_zero() {
        // 1/32 and 5/32 are exact in binary, so these are true ties
        assert_eq!(format_percent(0.03125), "3.13");
        assert_eq!(format_percent(0.15625), "15.63");
    }

    #[test]
    fn test_format_tag() {
        assert_eq!(format_tag(&tag("outdoor", 0.8675)), "outdoor 86.75%");
        assert_eq!(format_tag(&tag("sky", 0.5)), "sky 50%");
    }

    #[tokio::test]
    async fn test_missing_payload_never_calls_analyzer() {
        let mut mock = MockAnalyzer::new();
        mock.expect_analyze().times(0);
        let handler = handler_with(mock);

        let err = handler.handle(None).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        assert_eq!(err.to_string(), "Please select a valid image file.");
    }

    #[tokio::test]
    async fn test_empty_payload_never_calls_analyzer() {
        let mut mock = MockAnalyzer::new();
        mock.expect_analyze().times(0);
        let handler = handler_with(mock);

        let err = handler.handle(Some(Bytes::new())).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_decode_error() {
        let mut mock = MockAnalyzer::new();
        mock.expect_analyze().times(0);
        let handler = handler_with(mock);

        let err = handler
            .handle(Some(Bytes::from_static(b"plain text, not pixels")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Decode(DecodeError::UnsupportedFormat)
        ));
    }

    #[tokio::test]
    async fn test_caption_and_tags_in_order() {
        let handler = handler_with(analyzer_returning(AnalysisResult {
            caption: "a white square".to_string(),
            tags: vec![tag("white", 0.8675), tag("square", 0.5), tag("art", 0.123)],
            objects: None,
            text_lines: vec!["HELLO".to_string()],
        }));

        let response = handler.handle(Some(png(16, 16))).await.unwrap();

        assert_eq!(response.caption, "a white square");
        assert_eq!(
            response.tags,
            vec!["white 86.75%", "square 50%", "art 12.3%"]
        );
        assert_eq!(response.text, vec!["HELLO"]);
    }

    #[tokio::test]
    async fn test_no_objects_gives_reencoded_original() {
        let input = png(24, 12);
        let handler = handler_with(analyzer_returning(AnalysisResult {
            objects: Some(Vec::new()),
            ..Default::default()
        }));

        let response = handler.handle(Some(input.clone())).await.unwrap();

        let expected = RasterCodec
            .encode_png(&RasterCodec.decode(&input).unwrap())
            .unwrap();
        let actual = general_purpose::STANDARD
            .decode(&response.thumbnail_image)
            .unwrap();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_objects_drawn_unscaled_at_full_resolution() {
        let boxes = vec![object(10, 10, 20, 20), object(60, 5, 30, 40)];
        let handler = handler_with(analyzer_returning(AnalysisResult {
            caption: "two things".to_string(),
            objects: Some(boxes.clone()),
            ..Default::default()
        }));

        let response = handler.handle(Some(png(120, 80))).await.unwrap();
        let output = decode_output(&response);

        assert_eq!(output.dimensions(), (120, 80));
        for detected in &boxes {
            let b = detected.bounding_box;
            let (left, top) = (b.x as u32, b.y as u32);
            let (right, bottom) = (left + b.width, top + b.height);
            for (x, y) in [(left, top), (right, top), (left, bottom), (right, bottom)] {
                assert_eq!(*output.get_pixel(x, y), STROKE_COLOR, "corner ({}, {})", x, y);
            }
            let centre = output.get_pixel(left + b.width / 2, top + b.height / 2);
            assert_ne!(*centre, WHITE);
            assert_ne!(*centre, STROKE_COLOR);
        }
        assert_eq!(*output.get_pixel(0, 79), WHITE);
        assert_eq!(*output.get_pixel(45, 50), WHITE);
    }

    #[tokio::test]
    async fn test_thumbnail_size_downscales_output() {
        let handler = UploadHandler::new(
            Arc::new(analyzer_returning(AnalysisResult::default())),
            Arc::new(RasterCodec),
            HandlerSettings {
                thumbnail_size: Some(50),
                ..Default::default()
            },
        );

        let response = handler.handle(Some(png(200, 100))).await.unwrap();
        assert_eq!(decode_output(&response).dimensions(), (50, 25));
    }

    #[tokio::test]
    async fn test_analyzer_failure_propagates() {
        let mut mock = MockAnalyzer::new();
        mock.expect_analyze().times(1).returning(|_, _| {
            Err(AnalysisError::Service {
                status: 401,
                code: "401".to_string(),
                message: "Access denied due to invalid subscription key".to_string(),
            })
        });
        let handler = handler_with(mock);

        let err = handler.handle(Some(png(4, 4))).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Analysis(AnalysisError::Service { status: 401, .. })
        ));
    }

    struct SlowAnalyzer;

    #[async_trait]
    impl Analyzer for SlowAnalyzer {
        async fn analyze(
            &self,
            _image: Bytes,
            _features: &[VisualFeature],
        ) -> Result<AnalysisResult, AnalysisError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(AnalysisResult::default())
        }
    }

    #[tokio::test]
    async fn test_slow_analyzer_times_out() {
        let handler = UploadHandler::new(
            Arc::new(SlowAnalyzer),
            Arc::new(RasterCodec),
            HandlerSettings {
                analyzer_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let err = handler.handle(Some(png(4, 4))).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Analysis(AnalysisError::Timeout(_))
        ));
    }

    #[test]
    fn test_response_json_field_names() {
        let response = UploadResponse {
            caption: "c".to_string(),
            tags: vec!["t 1%".to_string()],
            thumbnail_image: "aGk=".to_string(),
            text: Vec::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["thumbnailImage"], "aGk=");
        assert_eq!(value["caption"], "c");
        assert_eq!(value["tags"][0], "t 1%");
    }
}
