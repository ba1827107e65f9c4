use std::time::Duration;

use reqwest::header::RETRY_AFTER;

use super::{Headers, RawBody, Transport, TransportError, TransportFuture, TransportSettings, TransportStrategy};

/// Plain HTTP client with decompression, bounded redirects and a cookie jar.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|error| TransportError::Tool(format!("failed to build http client: {error}")))?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawBody, TransportError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if !status.is_success() {
            let url = response.url().to_string();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), ?retry_after, "non-success response");
            return Err(TransportError::from_response(
                &url,
                status.as_u16(),
                retry_after,
                &body,
            ));
        }

        let text = response.text().await.map_err(map_reqwest_error)?;
        Ok(RawBody::from_text(text))
    }

    fn with_headers(mut request: reqwest::RequestBuilder, headers: &Headers) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl Transport for ReqwestTransport {
    fn strategy(&self) -> TransportStrategy {
        TransportStrategy::Standard
    }

    fn get<'a>(&'a self, url: &'a str, headers: &'a Headers) -> TransportFuture<'a, RawBody> {
        Box::pin(async move {
            let request = Self::with_headers(self.client.get(url), headers);
            self.send(request).await
        })
    }

    fn post<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
        headers: &'a Headers,
    ) -> TransportFuture<'a, RawBody> {
        Box::pin(async move {
            let request = Self::with_headers(self.client.post(url), headers).body(body.to_owned());
            self.send(request).await
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    TransportError::Network {
        message: error.to_string(),
        status: error.status().map(|status| status.as_u16()),
    }
}

/// Reads a `Retry-After` value given in seconds; HTTP-date hints are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const CHALLENGE_PAGE: &str = r#"<!DOCTYPE html><html><head><title>Just a moment...</title></head>
<body><div id="cf-challenge-running"></div></body></html>"#;

    /// Answers a single request with `status_line` and `body`.
    async fn serve_once(status_line: &str, extra_headers: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: text/html\r\ncontent-length: {}\r\n{extra_headers}connection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{address}/flights")
    }

    fn transport() -> ReqwestTransport {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        ReqwestTransport::with_client(client)
    }

    #[tokio::test]
    async fn challenge_pages_behind_error_statuses_are_challenges() {
        for status_line in ["503 Service Unavailable", "403 Forbidden"] {
            let url = serve_once(status_line, "", CHALLENGE_PAGE).await;

            let error = transport()
                .get(&url, &Headers::new())
                .await
                .expect_err("challenge");

            assert!(
                matches!(error, TransportError::Challenge { ref marker, .. } if marker == "Just a moment"),
                "{status_line}: {error:?}"
            );
        }
    }

    #[tokio::test]
    async fn plain_error_statuses_keep_their_status_and_hint() {
        let url = serve_once("503 Service Unavailable", "", "upstream down").await;
        let error = transport().get(&url, &Headers::new()).await.expect_err("503");
        assert_eq!(error, TransportError::from_status(503, None));

        let url = serve_once("429 Too Many Requests", "retry-after: 7\r\n", "slow down").await;
        let error = transport().get(&url, &Headers::new()).await.expect_err("429");
        assert_eq!(
            error,
            TransportError::RateLimited {
                status: 429,
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[tokio::test]
    async fn success_bodies_are_decoded_as_json() {
        let url = serve_once("200 OK", "", r#"{"flights": []}"#).await;
        let body = transport().get(&url, &Headers::new()).await.expect("body");
        assert_eq!(body, RawBody::Json(serde_json::json!({"flights": []})));
    }

    #[test]
    fn retry_after_accepts_delta_seconds_only() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-3"), None);
    }

    #[test]
    fn builds_from_default_settings() {
        let transport = ReqwestTransport::new(&TransportSettings::default()).expect("client");
        assert_eq!(transport.strategy(), TransportStrategy::Standard);
    }
}
