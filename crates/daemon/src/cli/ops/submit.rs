use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use clap::Args;
use owo_colors::OwoColorize;

use common::engine::SubmitOutcome;
use offsync_daemon::state::AppState;
use offsync_daemon::{ServiceError, Services, StateError};

#[derive(Args, Debug, Clone)]
pub struct Submit {
    /// Endpoint, relative to the configured API URL
    pub url: String,

    /// JSON payload, or @path to read it from a file
    #[arg(long, default_value = "{}")]
    pub data: String,

    /// Image file to attach (repeatable)
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,

    /// Queue without attempting delivery
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug)]
pub struct SubmitOutput {
    pub url: String,
    pub outcome: SubmitOutcome,
}

impl fmt::Display for SubmitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            SubmitOutcome::Delivered => {
                write!(f, "{} {}", "Delivered".green().bold(), self.url)
            }
            SubmitOutcome::Queued(entry) => write!(
                f,
                "{} {} as {} ({} image(s))",
                "Queued".yellow().bold(),
                self.url,
                entry.id.to_string().bold(),
                entry.images.len()
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Services(#[from] ServiceError),

    #[error("invalid JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn read_file(path: &Path) -> Result<Vec<u8>, SubmitError> {
    std::fs::read(path).map_err(|source| SubmitError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode a file as a data URI so the blob store keeps its image type.
fn encode_image(path: &Path) -> Result<String, SubmitError> {
    let bytes = read_file(path)?;
    let mime = mime_guess::from_path(path).first_or(mime_guess::mime::IMAGE_JPEG);
    Ok(format!(
        "data:{};base64,{}",
        mime.essence_str(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

impl Submit {
    fn payload(&self) -> Result<serde_json::Value, SubmitError> {
        match self.data.strip_prefix('@') {
            Some(path) => Ok(serde_json::from_slice(&read_file(Path::new(path))?)?),
            None => Ok(serde_json::from_str(&self.data)?),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Submit {
    type Error = SubmitError;
    type Output = SubmitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let payload = self.payload()?;
        let images = self
            .images
            .iter()
            .map(|path| encode_image(path))
            .collect::<Result<Vec<_>, _>>()?;

        let state = AppState::load(ctx.config_path.clone())?;
        let services = Services::open(&state).await?;
        if !self.offline {
            services.check_connectivity().await?;
        }

        let outcome = services
            .engine
            .submit(&self.url, payload, images)
            .await
            .map_err(ServiceError::from)?;

        Ok(SubmitOutput {
            url: self.url.clone(),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_image_uses_file_type() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("photo.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let encoded = encode_image(&path).unwrap();
        assert!(encoded.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_payload_from_inline_json() {
        let submit = Submit {
            url: "items".to_string(),
            data: r#"{"name":"widget"}"#.to_string(),
            images: vec![],
            offline: true,
        };
        assert_eq!(submit.payload().unwrap()["name"], "widget");
    }
}
