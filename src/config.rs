use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Default cap on the uploaded body (10MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Image analysis web app settings, read once at startup
#[derive(Parser, Debug, Clone)]
#[command(name = "vision-annotator")]
#[command(about = "Upload an image, get a caption, tags and annotated objects", long_about = None)]
pub struct Config {
    /// Azure AI Vision endpoint, e.g. https://<resource>.cognitiveservices.azure.com
    #[arg(long, env = "VISION_ENDPOINT")]
    pub vision_endpoint: String,

    /// Azure AI Vision subscription key
    #[arg(long, env = "VISION_KEY", hide_env_values = true)]
    pub vision_key: String,

    /// Address the HTTP server binds to
    #[arg(long = "listen", env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: SocketAddr,

    /// Upper bound on a single analyzer round trip
    #[arg(long, env = "ANALYZER_TIMEOUT_SECS", default_value_t = 30)]
    pub analyzer_timeout_secs: u64,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Downscale the annotated image to fit an NxN box. Unset keeps full resolution.
    #[arg(long, env = "THUMBNAIL_SIZE")]
    pub thumbnail_size: Option<u32>,

    /// Language of the caption and tags
    #[arg(long, env = "VISION_LANGUAGE", default_value = "en")]
    pub language: String,

    #[arg(long, env = "GENDER_NEUTRAL_CAPTION", default_value_t = false)]
    pub gender_neutral_caption: bool,
}

impl Config {
    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    /// Settings the analyzer adapter needs
    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            endpoint: self.vision_endpoint.clone(),
            key: self.vision_key.clone(),
            language: self.language.clone(),
            gender_neutral_caption: self.gender_neutral_caption,
        }
    }

    /// Settings the upload pipeline needs
    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            analyzer_timeout: self.analyzer_timeout(),
            thumbnail_size: self.thumbnail_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub endpoint: String,
    pub key: String,
    pub language: String,
    pub gender_neutral_caption: bool,
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub analyzer_timeout: Duration,
    pub thumbnail_size: Option<u32>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            analyzer_timeout: Duration::from_secs(30),
            thumbnail_size: None,
        }
    }
}
