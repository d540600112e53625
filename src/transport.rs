use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::error::TransportError;
use crate::models::{ApiRequest, ApiResponse};

/// Raw HTTP exchange. Whatever the status, a received response is `Ok`;
/// `Err` means no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport used in production.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(
                    "[HTTP] Failed to build client with {}s timeout, using defaults: {}",
                    timeout_secs, e
                );
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        // a status arrived, so the server saw the request
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::BodyRead(e.to_string()))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new(2);
        // port 9 (discard) on localhost is closed in test environments
        let result = transport
            .execute(&ApiRequest::get("http://127.0.0.1:9/api/me"))
            .await;
        match result {
            Err(e) => assert!(e.is_retryable(), "unexpected error: {}", e),
            Ok(r) => panic!("expected transport failure, got status {}", r.status),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_is_not_retryable() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.ends_with(b"{}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            // promise 100 bytes, send a few, hang up
            socket
                .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 100\r\n\r\n{\"id\":")
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });

        let transport = HttpTransport::new(5);
        let result = transport
            .execute(&ApiRequest::post(
                format!("http://{}/orders", addr),
                serde_json::json!({}),
            ))
            .await;
        server.await.unwrap();

        match result {
            Err(e @ TransportError::BodyRead(_)) => assert!(!e.is_retryable()),
            other => panic!("expected body read failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_url_is_invalid_request() {
        let transport = HttpTransport::new(2);
        let result = transport.execute(&ApiRequest::get("not a url")).await;
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }
}
