//! Best-effort push delivery.
//!
//! The external transport accepts a recipient id list plus a payload.
//! Delivery runs detached after the owning transaction commits; failures
//! are logged and swallowed so they can never roll back a transition.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::db::notify::FanOut;
use crate::telemetry::metrics;

/// Recipients per request; large fan-outs are chunked.
const CHUNK_SIZE: usize = 900;

#[derive(Clone)]
pub struct PushClient {
    inner: Option<Arc<PushInner>>,
}

struct PushInner {
    endpoint: String,
    server_key: Option<SecretString>,
    http: reqwest::Client,
}

impl PushClient {
    /// Build from config. Returns a disabled client when no endpoint is
    /// configured, so callers never need to branch.
    pub fn from_config(config: &Config) -> Self {
        match &config.push_endpoint {
            Some(endpoint) => Self {
                inner: Some(Arc::new(PushInner {
                    endpoint: endpoint.clone(),
                    server_key: config.push_server_key.clone(),
                    http: reqwest::Client::new(),
                })),
            },
            None => Self::disabled(),
        }
    }

    /// A client that drops every payload. Used in tests and when push is
    /// unconfigured.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Dispatch a fan-out to the transport, detached from the caller.
    pub fn deliver(&self, fan_out: FanOut) {
        let Some(inner) = self.inner.clone() else {
            tracing::debug!(
                kind = %fan_out.payload.kind,
                recipients = fan_out.recipients.len(),
                "push disabled, dropping payload"
            );
            return;
        };

        tokio::spawn(async move {
            for chunk in fan_out.recipients.chunks(CHUNK_SIZE) {
                let body = json!({
                    "registration_ids": chunk.iter().map(|u| u.0.to_string()).collect::<Vec<_>>(),
                    "priority": "high",
                    "content_available": true,
                    "notification": {
                        "title": &fan_out.payload.title,
                        "body": &fan_out.payload.body,
                    },
                    "data": &fan_out.payload,
                });

                let mut request = inner.http.post(&inner.endpoint).json(&body);
                if let Some(key) = &inner.server_key {
                    request = request.header("Authorization", format!("key={}", key.expose_secret()));
                }

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(
                            kind = %fan_out.payload.kind,
                            recipients = chunk.len(),
                            "push delivered"
                        );
                    }
                    Ok(response) => {
                        metrics::push_failures().add(1, &[]);
                        tracing::warn!(
                            kind = %fan_out.payload.kind,
                            status = %response.status(),
                            "push delivery rejected"
                        );
                    }
                    Err(err) => {
                        metrics::push_failures().add(1, &[]);
                        tracing::warn!(kind = %fan_out.payload.kind, error = %err, "push delivery failed");
                    }
                }
            }
        });
    }
}
