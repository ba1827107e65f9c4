//! Per-airport collectors.
//!
//! An [`AirportCollector`] pairs an [`AirportProfile`] (where and how to
//! fetch) with a transport factory and a retry policy. Collectors never
//! return errors: every failure, including a panic inside the run, ends up in
//! the returned [`CollectionResult`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use aerofeed_storage::key::format_date;
use futures::FutureExt;
use serde_json::Value;
use time::{Date, OffsetDateTime};
use tracing::Instrument;

use crate::domain::parsers;
use crate::retry::RetryPolicy;
use crate::transport::{challenge, Headers, RawBody, Transport, TransportFactory, TransportStrategy};
use crate::{
    CollectError, CollectedPayload, CollectionMetadata, CollectionResult, CollectorState,
    FlightDirection, FlightRecord, ParseContext, SourceKind,
};

/// Boxed future returned by [`Collector::collect`].
pub type CollectFuture<'a> = Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectRequest {
    pub airport: String,
    pub date: Date,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOptions {
    /// Flight date to query; defaults to today (UTC).
    pub date: Option<Date>,
    /// Store under test-run keys instead of production keys.
    pub test: bool,
    /// Return `Err` instead of a failed result.
    pub throw_on_error: bool,
    /// Overrides the collector's retry attempt limit.
    pub max_attempts: Option<u32>,
}

impl CollectOptions {
    pub fn flight_date(&self) -> Date {
        self.date
            .unwrap_or_else(|| OffsetDateTime::now_utc().date())
    }
}

pub trait Collector: Send + Sync {
    fn airport(&self) -> &str;

    fn can_handle(&self, request: &CollectRequest) -> bool;

    fn collect<'a>(&'a self, options: &'a CollectOptions) -> CollectFuture<'a>;
}

/// Where an airport publishes its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoints {
    Single { url: String },
    Dual { departures: String, arrivals: String },
}

/// Static description of one airport feed. URLs may contain a `{date}`
/// placeholder, replaced with the flight date as `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirportProfile {
    pub code: String,
    pub name: String,
    pub source: SourceKind,
    pub endpoints: Endpoints,
    pub referer: Option<String>,
    pub headers: Headers,
    pub transport: TransportStrategy,
}

impl AirportProfile {
    pub fn sfo() -> Self {
        Self {
            code: String::from("SFO"),
            name: String::from("San Francisco International"),
            source: SourceKind::Sfo,
            endpoints: Endpoints::Single {
                url: String::from("https://www.flysfo.com/flysfo/api/flight-status?date={date}"),
            },
            referer: Some(String::from("https://www.flysfo.com/flight-info/flight-status")),
            headers: Headers::new(),
            transport: TransportStrategy::Standard,
        }
    }

    pub fn yyz() -> Self {
        Self {
            code: String::from("YYZ"),
            name: String::from("Toronto Pearson International"),
            source: SourceKind::Yyz,
            endpoints: Endpoints::Dual {
                departures: String::from(
                    "https://www.torontopearson.com/api/flightsapi/getflights?type=DEP&day={date}",
                ),
                arrivals: String::from(
                    "https://www.torontopearson.com/api/flightsapi/getflights?type=ARR&day={date}",
                ),
            },
            referer: Some(String::from("https://www.torontopearson.com/en/departures")),
            headers: Headers::from([(String::from("X-Requested-With"), String::from("XMLHttpRequest"))]),
            transport: TransportStrategy::CommandLine,
        }
    }

    pub fn mia() -> Self {
        Self {
            code: String::from("MIA"),
            name: String::from("Miami International"),
            source: SourceKind::Mia,
            endpoints: Endpoints::Single {
                url: String::from("https://www.miami-airport.com/api/flights?date={date}"),
            },
            referer: Some(String::from("https://www.miami-airport.com/flight-information.asp")),
            headers: Headers::new(),
            transport: TransportStrategy::Browser,
        }
    }

    pub fn builtins() -> Vec<Self> {
        vec![Self::sfo(), Self::yyz(), Self::mia()]
    }

    pub fn builtin(code: &str) -> Option<Self> {
        Self::builtins()
            .into_iter()
            .find(|profile| profile.code.eq_ignore_ascii_case(code.trim()))
    }

    /// Headers sent with every request of this feed.
    pub fn request_headers(&self) -> Headers {
        let mut headers = Headers::from([(
            String::from("Accept"),
            String::from("application/json, text/plain, */*"),
        )]);
        if let Some(referer) = &self.referer {
            headers.insert(String::from("Referer"), referer.clone());
        }
        headers.extend(self.headers.clone());
        headers
    }
}

/// Replaces `{date}` in `template` with the URL-encoded flight date.
pub fn expand_url(template: &str, date: Date) -> String {
    template.replace("{date}", &urlencoding::encode(&format_date(date)))
}

pub struct AirportCollector {
    profile: AirportProfile,
    transports: Arc<dyn TransportFactory>,
    retry: RetryPolicy,
}

impl AirportCollector {
    pub fn new(
        profile: AirportProfile,
        transports: Arc<dyn TransportFactory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            profile,
            transports,
            retry,
        }
    }

    pub fn profile(&self) -> &AirportProfile {
        &self.profile
    }

    async fn run(&self, options: &CollectOptions) -> CollectionResult {
        let started = Instant::now();
        let mut metadata = CollectionMetadata::new(self.profile.code.clone(), options.flight_date());
        metadata.source = Some(self.profile.source);
        metadata.transport = Some(self.profile.transport);

        let retry = match options.max_attempts {
            Some(max_attempts) => self.retry.clone().with_max_attempts(max_attempts),
            None => self.retry.clone(),
        };

        let mut state = CollectorState::Idle;
        transition(&mut state, CollectorState::Requesting);

        let outcome = match self.transports.open(self.profile.transport).await {
            Ok(transport) => {
                let run = self.fetch_and_parse(transport.as_ref(), &retry, &mut metadata, &mut state);
                let outcome = AssertUnwindSafe(run).catch_unwind().await;
                if let Err(error) = transport.close().await {
                    tracing::warn!(error = %error, "failed to close transport");
                }
                outcome.unwrap_or_else(|_| {
                    Err(CollectError::Internal(String::from("collector panicked")))
                })
            }
            Err(error) => Err(CollectError::from(error)),
        };

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(payload) => {
                transition(&mut state, CollectorState::Success);
                tracing::info!(
                    records = payload.total(),
                    rejected = metadata.rejected,
                    attempts = metadata.attempts,
                    duration_ms = metadata.duration_ms,
                    "collection succeeded"
                );
                CollectionResult::success(metadata, payload)
            }
            Err(error) => {
                transition(&mut state, CollectorState::Failure);
                tracing::warn!(
                    code = error.code(),
                    error = %error,
                    attempts = metadata.attempts,
                    "collection failed"
                );
                CollectionResult::failure(metadata, error)
            }
        }
    }

    async fn fetch_and_parse(
        &self,
        transport: &dyn Transport,
        retry: &RetryPolicy,
        metadata: &mut CollectionMetadata,
        state: &mut CollectorState,
    ) -> Result<CollectedPayload, CollectError> {
        let headers = self.profile.request_headers();
        let date = metadata.flight_date;
        let home = ParseContext::new(self.profile.code.clone());

        match &self.profile.endpoints {
            Endpoints::Single { url } => {
                let url = expand_url(url, date);
                let (body, attempts) = fetch_json(transport, retry, &url, &headers).await;
                metadata.attempts += attempts;
                let body = body?;

                transition(state, CollectorState::Parsing);
                let (flights, rejected) = self.parse(&body, &home)?;
                metadata.rejected += rejected;
                Ok(CollectedPayload::flights(flights))
            }
            Endpoints::Dual {
                departures,
                arrivals,
            } => {
                let departures_url = expand_url(departures, date);
                let arrivals_url = expand_url(arrivals, date);
                let ((departures, departure_attempts), (arrivals, arrival_attempts)) = tokio::join!(
                    fetch_json(transport, retry, &departures_url, &headers),
                    fetch_json(transport, retry, &arrivals_url, &headers),
                );
                metadata.attempts += departure_attempts + arrival_attempts;
                let departures = departures?;
                let arrivals = arrivals?;

                transition(state, CollectorState::Parsing);
                let (departures, departures_rejected) = self.parse(
                    &departures,
                    &home.clone().with_direction(FlightDirection::Departure),
                )?;
                let (arrivals, arrivals_rejected) =
                    self.parse(&arrivals, &home.with_direction(FlightDirection::Arrival))?;
                metadata.rejected += departures_rejected + arrivals_rejected;
                Ok(CollectedPayload::ByDirection {
                    departures,
                    arrivals,
                })
            }
        }
    }

    /// Returns the valid records and the number of rejected elements.
    ///
    /// A non-empty array in which every element is rejected is an error.
    fn parse(
        &self,
        body: &Value,
        context: &ParseContext,
    ) -> Result<(Vec<FlightRecord>, usize), CollectError> {
        let source = self.profile.source;
        let elements = parsers::records(source, body)?;

        let mut flights = Vec::with_capacity(elements.len());
        let mut rejected = 0;
        for element in elements {
            let record = FlightRecord::from_source_data(source, element, context);
            match record.validate() {
                Ok(()) => flights.push(record),
                Err(error) => {
                    rejected += 1;
                    tracing::debug!(error = %error, "dropping invalid record");
                }
            }
        }
        if flights.is_empty() && rejected > 0 {
            return Err(CollectError::Validation(format!(
                "all {rejected} {source} records failed validation"
            )));
        }
        Ok((flights, rejected))
    }
}

impl Collector for AirportCollector {
    fn airport(&self) -> &str {
        &self.profile.code
    }

    fn can_handle(&self, request: &CollectRequest) -> bool {
        request.airport.trim().eq_ignore_ascii_case(&self.profile.code)
    }

    fn collect<'a>(&'a self, options: &'a CollectOptions) -> CollectFuture<'a> {
        let span = tracing::info_span!(
            "collect",
            airport = %self.profile.code,
            source = %self.profile.source,
            transport = %self.profile.transport,
        );
        Box::pin(self.run(options).instrument(span))
    }
}

fn transition(state: &mut CollectorState, next: CollectorState) {
    tracing::debug!(from = %state, to = %next, "collector state");
    *state = next;
}

/// Fetches `url` under the retry policy; returns the body and the attempts spent.
async fn fetch_json(
    transport: &dyn Transport,
    retry: &RetryPolicy,
    url: &str,
    headers: &Headers,
) -> (Result<Value, CollectError>, u32) {
    let mut attempts = 0;
    let result = retry
        .execute(|attempt| {
            attempts = attempt;
            async move {
                let body = transport.get(url, headers).await?;
                into_json(body, url)
            }
        })
        .await;
    (result, attempts)
}

fn into_json(body: RawBody, url: &str) -> Result<Value, CollectError> {
    match body {
        RawBody::Json(value) => Ok(value),
        RawBody::Text(text) => match challenge::detect(&text) {
            Some(marker) => Err(CollectError::Challenge {
                url: url.to_owned(),
                marker: marker.to_owned(),
            }),
            None => Err(CollectError::Validation(format!(
                "response from {url} is not JSON"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use time::macros::date;

    use super::*;
    use crate::retry::Backoff;
    use crate::transport::{FixedTransport, TransportError, TransportFuture};

    struct ScriptedTransport {
        calls: AtomicUsize,
        respond: Box<dyn Fn(usize, &str) -> Result<RawBody, TransportError> + Send + Sync>,
    }

    impl ScriptedTransport {
        fn new(
            respond: impl Fn(usize, &str) -> Result<RawBody, TransportError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn strategy(&self) -> TransportStrategy {
            TransportStrategy::Standard
        }

        fn get<'a>(&'a self, url: &'a str, _headers: &'a Headers) -> TransportFuture<'a, RawBody> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = (self.respond)(call, url);
            Box::pin(async move { response })
        }

        fn post<'a>(
            &'a self,
            url: &'a str,
            _body: &'a str,
            headers: &'a Headers,
        ) -> TransportFuture<'a, RawBody> {
            self.get(url, headers)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Backoff::Fixed {
                delay: Duration::from_millis(1),
            },
        )
    }

    fn collector(profile: AirportProfile, transport: Arc<ScriptedTransport>) -> AirportCollector {
        let transport: Arc<dyn Transport> = transport;
        AirportCollector::new(profile, Arc::new(FixedTransport(transport)), fast_retry())
    }

    fn options() -> CollectOptions {
        CollectOptions {
            date: Some(date!(2026 - 10 - 19)),
            ..CollectOptions::default()
        }
    }

    #[test]
    fn expand_url_fills_date_placeholder() {
        assert_eq!(
            expand_url("https://airport.test/flights?day={date}", date!(2026 - 10 - 19)),
            "https://airport.test/flights?day=2026-10-19"
        );
    }

    #[test]
    fn can_handle_matches_airport_case_insensitively() {
        let transport = ScriptedTransport::new(|_, _| Ok(RawBody::Json(json!({}))));
        let collector = collector(AirportProfile::sfo(), transport);
        let request = CollectRequest {
            airport: String::from(" sfo"),
            date: date!(2026 - 10 - 19),
        };
        assert!(collector.can_handle(&request));
        assert!(!collector.can_handle(&CollectRequest {
            airport: String::from("YYZ"),
            ..request
        }));
    }

    #[tokio::test]
    async fn single_feed_drops_invalid_records_and_counts_them() {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(RawBody::Json(json!({
                "data": [
                    {
                        "id": "UA100-20261019",
                        "flight_number": "UA100",
                        "airline": {"iata_code": "UA", "name": "United"},
                        "to_airport": "LAX",
                        "scheduled_time": "2026-10-19T08:00:00",
                        "status": "On Time"
                    },
                    {"flight_number": "", "status": "Delayed"}
                ]
            })))
        });
        let result = collector(AirportProfile::sfo(), transport).collect(&options()).await;

        let payload = result.payload().expect("success");
        assert_eq!(payload.total(), 1);
        assert_eq!(result.metadata.rejected, 1);
        assert_eq!(result.metadata.attempts, 1);
        assert_eq!(result.metadata.source, Some(SourceKind::Sfo));
    }

    #[tokio::test]
    async fn dual_feed_fetches_both_halves() {
        let transport = ScriptedTransport::new(|_, url| {
            let flight = if url.contains("type=DEP") { "AC100" } else { "AC200" };
            Ok(RawBody::Json(json!({
                "list": [{
                    "flightNumber": flight,
                    "airlineCode": "AC",
                    "airlineName": "Air Canada",
                    "schedTime": "2026-10-19T09:00",
                    "city": "Vancouver",
                    "airportCode": "YVR",
                    "status": "On Time"
                }]
            })))
        });
        let result = collector(AirportProfile::yyz(), Arc::clone(&transport))
            .collect(&options())
            .await;

        match result.payload().expect("success") {
            CollectedPayload::ByDirection {
                departures,
                arrivals,
            } => {
                assert_eq!(departures.len(), 1);
                assert_eq!(arrivals.len(), 1);
                assert_eq!(departures[0].origin, "YYZ");
                assert_eq!(arrivals[0].destination, "YYZ");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.metadata.attempts, 2);
    }

    #[tokio::test]
    async fn challenge_page_fails_without_retry() {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(RawBody::Text(String::from(
                "<html><title>Just a moment...</title></html>",
            )))
        });
        let result = collector(AirportProfile::mia(), Arc::clone(&transport))
            .collect(&options())
            .await;

        assert_eq!(result.error().map(CollectError::kind), Some("challenge"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let transport = ScriptedTransport::new(|call, _| {
            if call < 2 {
                Err(TransportError::from_status(503, None))
            } else {
                Ok(RawBody::Json(json!({"flights": []})))
            }
        });
        let result = collector(AirportProfile::mia(), Arc::clone(&transport))
            .collect(&options())
            .await;

        assert!(result.is_success());
        assert_eq!(result.payload().map(CollectedPayload::total), Some(0));
        assert_eq!(result.metadata.attempts, 3);
    }

    #[tokio::test]
    async fn feed_with_only_rejected_records_fails() {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(RawBody::Json(json!({
                "data": [
                    {"flight_number": "", "status": "Delayed"},
                    {"id": "x", "flight_number": "ZZ1", "airline_code": "ZZ", "scheduled_time": "t"}
                ]
            })))
        });
        let result = collector(AirportProfile::sfo(), transport).collect(&options()).await;

        assert_eq!(result.error().map(CollectError::kind), Some("validation"));
    }

    #[tokio::test]
    async fn dual_feed_served_through_a_single_url_fails() {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(RawBody::Json(json!({
                "list": [{
                    "flightNumber": "AC100",
                    "airlineCode": "AC",
                    "schedTime": "2026-10-19T09:00",
                    "airportCode": "YVR"
                }]
            })))
        });
        let profile = AirportProfile {
            endpoints: Endpoints::Single {
                url: String::from("https://yyz.test/flights"),
            },
            ..AirportProfile::yyz()
        };
        let result = collector(profile, transport).collect(&options()).await;

        assert!(!result.is_success());
        assert_eq!(result.error().map(CollectError::kind), Some("validation"));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_validation_failure() {
        let transport = ScriptedTransport::new(|_, _| Ok(RawBody::Json(json!({"unexpected": true}))));
        let result = collector(AirportProfile::sfo(), transport).collect(&options()).await;

        assert_eq!(result.error().map(CollectError::kind), Some("validation"));
    }
}
