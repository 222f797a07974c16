//! Remote delivery of queued mutations.
//!
//! The engine treats delivery as an opaque call that either succeeds or
//! fails; it has no dedup beyond removing an item after a confirmed success,
//! so endpoints should tolerate a replay of the same mutation.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// A mutation ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    /// Endpoint URL (relative to the API base) or symbolic action name
    pub endpoint: String,
    pub payload: Value,
    /// Attached images, base64 encoded
    pub images: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Server { status: u16, body: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Delivery: Send + Sync + Debug {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// Delivers mutations as JSON POSTs against an API base URL.
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    base: Url,
    client: Client,
}

impl HttpDelivery {
    pub fn new(base: &Url, timeout: Option<Duration>) -> Result<Self, DeliveryError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let mut builder = Client::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base: base.clone(),
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Absolute endpoints are used as-is, anything else is joined to the base.
    fn resolve(&self, endpoint: &str) -> Result<Url, DeliveryError> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }
        self.base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|_| DeliveryError::InvalidEndpoint(endpoint.to_string()))
    }
}

/// Merge images into the payload: objects get an `images` field, anything
/// else is wrapped as `{ "data": .., "images": .. }`.
pub fn request_body(request: &DeliveryRequest) -> Value {
    match &request.payload {
        Value::Object(fields) if request.images.is_empty() => Value::Object(fields.clone()),
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.insert("images".to_string(), Value::from(request.images.clone()));
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("data".to_string(), other.clone());
            fields.insert("images".to_string(), Value::from(request.images.clone()));
            Value::Object(fields)
        }
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let url = self.resolve(&request.endpoint)?;
        debug!(url = %url, images = request.images.len(), "delivering mutation");

        let response = self
            .client
            .post(url)
            .json(&request_body(request))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Server {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}
