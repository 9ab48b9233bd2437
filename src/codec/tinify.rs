//! Remote compression through the Tinify shrink API.

use super::{Codec, CodecError, CodecHandler, CodecOptions};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.tinify.com";

/// Connection timeout for Tinify requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for Tinify requests.
const READ_TIMEOUT_SECS: u64 = 300;

pub(crate) struct TinifyHandler {
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: ShrinkOutput,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    message: String,
}

impl TinifyHandler {
    pub(crate) fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub(crate) fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn client() -> Result<Client, CodecError> {
        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()?)
    }
}

impl CodecHandler for TinifyHandler {
    fn codec(&self) -> Codec {
        Codec::Tinify
    }

    fn encode(&self, input: &[u8], options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        let key = options
            .tinify_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CodecError::Remote("no API key configured".to_string()))?;

        let client = Self::client()?;
        let response = client
            .post(format!("{}/shrink", self.endpoint))
            .basic_auth("api", Some(key))
            .body(input.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ApiError>() {
                Ok(api) => format!("{}: {}", api.error, api.message),
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(CodecError::Remote(detail));
        }

        let shrink: ShrinkResponse = response.json()?;
        tracing::debug!(url = %shrink.output.url, "Tinify shrink finished, downloading output");

        let output = client
            .get(&shrink.output.url)
            .basic_auth("api", Some(key))
            .send()?
            .error_for_status()?;
        Ok(output.bytes()?.to_vec())
    }
}
