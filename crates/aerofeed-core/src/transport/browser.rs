//! Headless Chromium transport for feeds behind challenge pages.
//!
//! One browser process per transport. Cookies earned by passing a challenge
//! live in that process, so later calls on the same instance reuse them.

use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers as CdpHeaders, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{
    challenge, Headers, RawBody, Transport, TransportError, TransportFuture, TransportSettings,
    TransportStrategy,
};

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

pub struct BrowserTransport {
    settings: TransportSettings,
    session: Mutex<Option<BrowserSession>>,
}

#[derive(Debug, Deserialize)]
struct FetchResult {
    status: u16,
    body: String,
}

fn browser_error(error: impl std::fmt::Display) -> TransportError {
    TransportError::Browser(error.to_string())
}

/// Where a page stands after one challenge poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChallengeWait {
    Cleared,
    Waiting(&'static str),
    Expired(&'static str),
}

fn challenge_wait(html: &str, elapsed: Duration, timeout: Duration) -> ChallengeWait {
    match challenge::detect(html) {
        None => ChallengeWait::Cleared,
        Some(marker) if elapsed >= timeout => ChallengeWait::Expired(marker),
        Some(marker) => ChallengeWait::Waiting(marker),
    }
}

/// Page HTML once polling stops.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageState {
    Cleared(String),
    Blocked(String),
}

/// Text of the first `<pre>` element, which is how Chromium renders a JSON
/// document, or the tag-stripped `<body>` otherwise.
fn extract_text(html: &str) -> String {
    if let Some(pre) = element_inner(html, "pre") {
        return decode_entities(pre);
    }
    let body = element_inner(html, "body").unwrap_or(html);
    decode_entities(strip_tags(body).trim())
}

fn element_inner<'a>(html: &'a str, tag: &str) -> Option<&'a str> {
    let open = html.find(&format!("<{tag}"))?;
    let start = open + html[open..].find('>')? + 1;
    let end = start + html[start..].find(&format!("</{tag}>"))?;
    Some(&html[start..end])
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Decodes the `{status, body}` pair returned by the in-page `fetch`.
fn fetch_outcome(url: &str, raw: &str) -> Result<RawBody, TransportError> {
    let result: FetchResult = serde_json::from_str(raw).map_err(browser_error)?;
    if !(200..300).contains(&result.status) {
        return Err(TransportError::from_response(
            url,
            result.status,
            None,
            &result.body,
        ));
    }
    Ok(RawBody::from_text(result.body))
}

impl BrowserTransport {
    /// Starts a headless browser with the stealth script installed.
    pub async fn launch(settings: TransportSettings) -> Result<Self, TransportError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .request_timeout(settings.timeout);
        if let Some(chrome) = &settings.chrome_bin {
            builder = builder.chrome_executable(chrome);
        }
        let config = builder.build().map_err(TransportError::Browser)?;

        let (browser, mut events) = Browser::launch(config).await.map_err(browser_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match Self::prepare_page(&browser, &settings).await {
            Ok(page) => page,
            Err(error) => {
                handler.abort();
                return Err(error);
            }
        };

        tracing::info!("browser transport launched");
        Ok(Self {
            settings,
            session: Mutex::new(Some(BrowserSession {
                browser,
                page,
                handler,
            })),
        })
    }

    async fn prepare_page(browser: &Browser, settings: &TransportSettings) -> Result<Page, TransportError> {
        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(browser_error)?;
        page.execute(SetUserAgentOverrideParams::new(settings.user_agent.clone()))
            .await
            .map_err(browser_error)?;
        Ok(page)
    }

    async fn set_headers(page: &Page, headers: &Headers) -> Result<(), TransportError> {
        let value = serde_json::to_value(headers).map_err(browser_error)?;
        page.execute(SetExtraHttpHeadersParams::new(CdpHeaders::new(value)))
            .await
            .map_err(browser_error)?;
        Ok(())
    }

    /// Polls until no challenge marker remains or the wait-out expires.
    ///
    /// An expired wait is not an error; the still-blocked page is returned
    /// and the caller decides what a challenge means.
    async fn wait_out_challenge(&self, page: &Page, url: &str) -> Result<PageState, TransportError> {
        let started = Instant::now();
        loop {
            let html = page.content().await.map_err(browser_error)?;
            match challenge_wait(&html, started.elapsed(), self.settings.challenge_timeout) {
                ChallengeWait::Cleared => return Ok(PageState::Cleared(html)),
                ChallengeWait::Expired(marker) => {
                    tracing::warn!(url, marker, "challenge did not clear before timeout");
                    return Ok(PageState::Blocked(html));
                }
                ChallengeWait::Waiting(marker) => {
                    tracing::debug!(url, marker, "waiting for challenge to clear");
                    tokio::time::sleep(self.settings.challenge_poll).await;
                }
            }
        }
    }

    async fn navigate(&self, url: &str, headers: &Headers) -> Result<RawBody, TransportError> {
        let guard = self.session.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| TransportError::Browser(String::from("browser already closed")))?;
        let page = &session.page;

        Self::set_headers(page, headers).await?;
        page.goto(url).await.map_err(browser_error)?;
        page.wait_for_navigation().await.map_err(browser_error)?;

        match self.wait_out_challenge(page, url).await? {
            PageState::Cleared(html) => Ok(RawBody::from_text(extract_text(&html))),
            PageState::Blocked(html) => Ok(RawBody::Text(html)),
        }
    }

    async fn fetch_post(&self, url: &str, body: &str, headers: &Headers) -> Result<RawBody, TransportError> {
        let guard = self.session.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| TransportError::Browser(String::from("browser already closed")))?;
        let page = &session.page;

        // fetch() with credentials needs a same-origin document.
        let origin = reqwest::Url::parse(url)
            .map_err(browser_error)?
            .origin()
            .ascii_serialization();
        let current = page.url().await.map_err(browser_error)?.unwrap_or_default();
        if !current.starts_with(&origin) {
            page.goto(origin.as_str()).await.map_err(browser_error)?;
            if let PageState::Blocked(html) = self.wait_out_challenge(page, &origin).await? {
                return Ok(RawBody::Text(html));
            }
        }

        let expression = format!(
            "(async () => {{ const response = await fetch({url}, {{ method: 'POST', body: {body}, headers: {headers}, credentials: 'include' }}); return JSON.stringify({{ status: response.status, body: await response.text() }}); }})()",
            url = serde_json::to_string(url).map_err(browser_error)?,
            body = serde_json::to_string(body).map_err(browser_error)?,
            headers = serde_json::to_string(headers).map_err(browser_error)?,
        );
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(TransportError::Browser)?;

        let raw: String = page
            .evaluate_expression(params)
            .await
            .map_err(browser_error)?
            .into_value()
            .map_err(browser_error)?;
        fetch_outcome(url, &raw)
    }
}

impl Transport for BrowserTransport {
    fn strategy(&self) -> TransportStrategy {
        TransportStrategy::Browser
    }

    fn get<'a>(&'a self, url: &'a str, headers: &'a Headers) -> TransportFuture<'a, RawBody> {
        Box::pin(self.navigate(url, headers))
    }

    fn post<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
        headers: &'a Headers,
    ) -> TransportFuture<'a, RawBody> {
        Box::pin(self.fetch_post(url, body, headers))
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut session) = self.session.lock().await.take() else {
                return Ok(());
            };
            let closed = session.browser.close().await.map_err(browser_error);
            let _ = session.browser.wait().await;
            session.handler.abort();
            tracing::info!("browser transport closed");
            closed.map(|_| ())
        })
    }
}

impl Drop for BrowserTransport {
    fn drop(&mut self) {
        let Some(mut session) = self.session.get_mut().take() else {
            return;
        };
        tracing::warn!("browser transport dropped without close");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = session.browser.close().await;
                    let _ = session.browser.wait().await;
                    session.handler.abort();
                });
            }
            // Dropping the browser handle kills the child process.
            Err(_) => session.handler.abort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CHROMIUM_JSON_VIEW: &str = r#"<html><head><meta name="color-scheme" content="light dark"></head><body><pre style="word-wrap: break-word; white-space: pre-wrap;">{"flights":[{"gate":"D&amp;E","note":"&lt;tbd&gt;"}]}</pre><div class="json-formatter-container"></div></body></html>"#;

    #[test]
    fn challenge_wait_keeps_polling_until_timeout() {
        let blocked = "<html><title>Just a moment...</title></html>";
        let timeout = Duration::from_secs(30);

        assert_eq!(
            challenge_wait(blocked, Duration::from_secs(1), timeout),
            ChallengeWait::Waiting("Just a moment")
        );
        assert_eq!(
            challenge_wait(blocked, timeout, timeout),
            ChallengeWait::Expired("Just a moment")
        );
        assert_eq!(
            challenge_wait(CHROMIUM_JSON_VIEW, Duration::ZERO, timeout),
            ChallengeWait::Cleared
        );
    }

    #[test]
    fn extract_text_prefers_pre_and_decodes_entities() {
        let text = extract_text(CHROMIUM_JSON_VIEW);
        assert_eq!(
            RawBody::from_text(text),
            RawBody::Json(json!({"flights": [{"gate": "D&E", "note": "<tbd>"}]}))
        );
    }

    #[test]
    fn extract_text_falls_back_to_body_text() {
        let html = "<html><head><title>x</title></head><body><div>{\"list\":</div> <span>[]}</span></body></html>";
        assert_eq!(extract_text(html), "{\"list\": []}");
        assert_eq!(extract_text("plain"), "plain");
    }

    #[test]
    fn fetch_outcome_classifies_status_and_body() {
        let url = "https://airport.test/api";

        let ok = fetch_outcome(url, r#"{"status":200,"body":"{\"list\":[]}"}"#).expect("ok");
        assert_eq!(ok, RawBody::Json(json!({"list": []})));

        let challenged = fetch_outcome(
            url,
            r#"{"status":403,"body":"<title>Attention Required</title>"}"#,
        )
        .expect_err("challenge");
        assert!(matches!(challenged, TransportError::Challenge { ref marker, .. } if marker == "Attention Required"));

        let unavailable = fetch_outcome(url, r#"{"status":503,"body":"down"}"#).expect_err("503");
        assert_eq!(unavailable, TransportError::from_status(503, None));

        let garbled = fetch_outcome(url, "undefined").expect_err("not json");
        assert!(matches!(garbled, TransportError::Browser(_)));
    }

    #[tokio::test]
    async fn closed_transport_rejects_requests_and_closes_again() {
        let transport = BrowserTransport {
            settings: TransportSettings::default(),
            session: Mutex::new(None),
        };

        let error = transport
            .get("https://airport.test/api", &Headers::new())
            .await
            .expect_err("closed");
        assert_eq!(error, TransportError::Browser(String::from("browser already closed")));
        assert!(transport.close().await.is_ok());
        assert_eq!(transport.strategy(), TransportStrategy::Browser);
        drop(transport);
    }
}
