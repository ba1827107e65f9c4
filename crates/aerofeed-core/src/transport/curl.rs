use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::Command;

use super::{Headers, RawBody, Transport, TransportError, TransportFuture, TransportSettings, TransportStrategy};

// Connect, resolve, timeout, TLS handshake, empty reply, receive failure.
const NETWORK_EXIT_CODES: [i32; 6] = [6, 7, 28, 35, 52, 56];

const STATUS_WRITE_OUT: &str = "\n%{http_code}";

/// Shells out to the `curl` binary, whose TLS fingerprint passes checks
/// that reject library HTTP clients.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    settings: TransportSettings,
}

impl CurlTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    async fn run(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        headers: &Headers,
    ) -> Result<RawBody, TransportError> {
        let args = build_args(&self.settings, method, url, body, headers);
        tracing::debug!(bin = %self.settings.curl_bin, method, url, "spawning curl");

        let output = Command::new(&self.settings.curl_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => TransportError::Tool(format!(
                    "curl binary '{}' not found",
                    self.settings.curl_bin
                )),
                _ => TransportError::Tool(format!("failed to spawn curl: {error}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(match output.status.code() {
                Some(code) if NETWORK_EXIT_CODES.contains(&code) => TransportError::Network {
                    message: format!("curl exited with {code}: {stderr}"),
                    status: None,
                },
                Some(code) => TransportError::Tool(format!("curl exited with {code}: {stderr}")),
                None => TransportError::Tool(String::from("curl was terminated by a signal")),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        response_body(url, &stdout)
    }
}

impl Transport for CurlTransport {
    fn strategy(&self) -> TransportStrategy {
        TransportStrategy::CommandLine
    }

    fn get<'a>(&'a self, url: &'a str, headers: &'a Headers) -> TransportFuture<'a, RawBody> {
        Box::pin(self.run("GET", url, None, headers))
    }

    fn post<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
        headers: &'a Headers,
    ) -> TransportFuture<'a, RawBody> {
        Box::pin(self.run("POST", url, Some(body), headers))
    }
}

/// Argument vector for one curl invocation; the status code is appended to
/// stdout on its own line.
pub fn build_args(
    settings: &TransportSettings,
    method: &str,
    url: &str,
    body: Option<&str>,
    headers: &Headers,
) -> Vec<String> {
    let mut args = vec![
        String::from("-s"),
        String::from("-S"),
        String::from("-L"),
        String::from("--compressed"),
        String::from("--max-redirs"),
        settings.max_redirects.to_string(),
        String::from("--max-time"),
        settings.timeout.as_secs().max(1).to_string(),
        String::from("-A"),
        settings.user_agent.clone(),
        String::from("-X"),
        method.to_owned(),
    ];

    for (name, value) in headers {
        args.push(String::from("-H"));
        args.push(format!("{name}: {value}"));
    }
    if let Some(body) = body {
        args.push(String::from("--data-raw"));
        args.push(body.to_owned());
    }

    args.push(String::from("-w"));
    args.push(String::from(STATUS_WRITE_OUT));
    args.push(url.to_owned());
    args
}

fn split_status(stdout: &str) -> Result<(u16, &str), TransportError> {
    let (body, status) = stdout
        .rsplit_once('\n')
        .ok_or_else(|| TransportError::Tool(String::from("curl output has no status line")))?;
    let status = status.trim().parse::<u16>().map_err(|_| {
        TransportError::Tool(format!("curl reported unparseable status '{}'", status.trim()))
    })?;
    Ok((status, body))
}

/// Splits curl's stdout and classifies non-2xx responses by status and body.
fn response_body(url: &str, stdout: &str) -> Result<RawBody, TransportError> {
    let (status, body) = split_status(stdout)?;
    if !(200..300).contains(&status) {
        return Err(TransportError::from_response(url, status, None, body));
    }
    Ok(RawBody::from_text(body))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn build_args_passes_headers_body_and_limits() {
        let settings = TransportSettings {
            timeout: Duration::from_secs(20),
            max_redirects: 3,
            user_agent: String::from("aerofeed-test"),
            ..TransportSettings::default()
        };
        let mut headers = Headers::new();
        headers.insert(String::from("Referer"), String::from("https://airport.test/"));

        let args = build_args(
            &settings,
            "POST",
            "https://airport.test/api",
            Some("{\"q\":1}"),
            &headers,
        );

        let joined = args.join(" ");
        assert!(joined.contains("--compressed"));
        assert!(joined.contains("--max-redirs 3"));
        assert!(joined.contains("--max-time 20"));
        assert!(joined.contains("-A aerofeed-test"));
        assert!(joined.contains("-X POST"));
        assert!(joined.contains("-H Referer: https://airport.test/"));
        assert!(joined.contains("--data-raw {\"q\":1}"));
        assert_eq!(args.last().map(String::as_str), Some("https://airport.test/api"));
    }

    #[test]
    fn get_has_no_body_argument() {
        let args = build_args(
            &TransportSettings::default(),
            "GET",
            "https://airport.test/api",
            None,
            &Headers::new(),
        );
        assert!(!args.iter().any(|arg| arg == "--data-raw"));
    }

    #[test]
    fn split_status_separates_trailing_code() {
        let (status, body) = split_status("{\"list\":[]}\n200").expect("status");
        assert_eq!(status, 200);
        assert_eq!(body, "{\"list\":[]}");

        let (status, body) = split_status("\n204").expect("status");
        assert_eq!(status, 204);
        assert!(body.is_empty());

        assert!(split_status("no status").is_err());
    }

    #[test]
    fn challenge_page_with_error_status_is_a_challenge() {
        let page = "<html><title>Just a moment...</title><script>_cf_chl_opt={}</script></html>";
        for status in [403, 503] {
            let stdout = format!("{page}\n{status}");
            let error = response_body("https://airport.test/api", &stdout).expect_err("challenge");
            assert!(matches!(error, TransportError::Challenge { .. }), "{status}: {error:?}");
        }

        let error = response_body("https://airport.test/api", "bad gateway\n502").expect_err("502");
        assert_eq!(error, TransportError::from_status(502, None));

        let body = response_body("https://airport.test/api", "{\"list\":[]}\n200").expect("ok");
        assert_eq!(body, RawBody::Json(serde_json::json!({"list": []})));
    }

    #[tokio::test]
    async fn missing_binary_is_a_tool_error() {
        let transport = CurlTransport::new(TransportSettings {
            curl_bin: String::from("/nonexistent/aerofeed-curl"),
            ..TransportSettings::default()
        });

        let error = transport
            .get("https://airport.test/api", &Headers::new())
            .await
            .expect_err("missing binary");
        assert!(matches!(error, TransportError::Tool(_)));
    }
}
