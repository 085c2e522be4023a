//! Image analysis web app: upload an image, forward it to Azure AI Vision,
//! and show the caption, tags and an annotated copy with object boxes.

pub mod analyzer;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod page;
pub mod server;

pub use analyzer::{AnalysisResult, Analyzer, AzureVisionClient};
pub use codec::{ImageCodec, RasterCodec};
pub use config::Config;
pub use error::UploadError;
pub use handler::{UploadHandler, UploadResponse};
