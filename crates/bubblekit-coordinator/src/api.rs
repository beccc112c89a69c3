//! Background-side API proxy
//!
//! The widget frame cannot reach external origins itself; it asks the
//! content script, which forwards a `getApiData` envelope here. JSON in,
//! JSON out.

use bubblekit_core::{BubbleKitError, BubbleKitResult};
use bubblekit_transport::ApiOptions;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// Proxies external API fetches for widget frames.
#[derive(Debug, Clone)]
pub struct ApiProxy {
    client: reqwest::Client,
}

impl ApiProxy {
    pub fn new(timeout: Duration) -> BubbleKitResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BubbleKitError::Other(e.into()))?;
        Ok(Self { client })
    }

    /// Perform one proxied fetch. Method defaults to GET; the response body
    /// must be JSON.
    pub async fn fetch(&self, url: &str, options: &ApiOptions) -> BubbleKitResult<JsonValue> {
        let method = match &options.method {
            Some(name) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| BubbleKitError::malformed(format!("bad method: {name}")))?,
            None => Method::GET,
        };
        debug!(%method, url, "Proxying API fetch");

        let mut request = self.client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BubbleKitError::Other(e.into()))?
            .error_for_status()
            .map_err(|e| BubbleKitError::Other(e.into()))?;

        let data = response
            .json()
            .await
            .map_err(|e| BubbleKitError::malformed(format!("non-JSON API response: {e}")))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_method_rejected_without_network() {
        let proxy = ApiProxy::new(Duration::from_secs(1)).unwrap();
        let options = ApiOptions {
            method: Some("NOT A METHOD".to_string()),
            ..ApiOptions::default()
        };
        let result = proxy.fetch("https://api.example.com/v1", &options).await;
        assert!(matches!(result, Err(BubbleKitError::MalformedMessage(_))));
    }
}
