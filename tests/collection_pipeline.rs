//! Behavior-driven tests for the collection pipeline
//!
//! These tests drive `CollectionService` end to end with scripted transports
//! and a filesystem store, checking what lands on disk.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aerofeed_core::transport::{FixedTransport, Headers, TransportFuture};
use aerofeed_core::{
    AirportCollector, AirportProfile, AppConfig, CollectAllOptions, CollectOptions,
    CollectionService, Endpoints, RawBody, SourceKind, Transport, TransportError,
    TransportStrategy,
};
use aerofeed_storage::{FileSystemStore, FlightStore, FlightType, LoadOptions, StorageKey};
use aerofeed_tests::{fast_policy, FLIGHT_DATE};
use serde_json::{json, Value};
use tempfile::tempdir;

struct StaticTransport {
    calls: AtomicUsize,
    response: Result<Value, TransportError>,
}

impl StaticTransport {
    fn ok(body: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            response: Ok(body),
        })
    }

    fn failing(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            response: Err(error),
        })
    }
}

impl Transport for StaticTransport {
    fn strategy(&self) -> TransportStrategy {
        TransportStrategy::Standard
    }

    fn get<'a>(&'a self, _url: &'a str, _headers: &'a Headers) -> TransportFuture<'a, RawBody> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.response.clone().map(RawBody::Json);
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

fn profile(code: &str, source: SourceKind) -> AirportProfile {
    AirportProfile {
        code: code.to_owned(),
        name: format!("{code} test airport"),
        source,
        endpoints: Endpoints::Single {
            url: format!("https://{}.test/flights?date={{date}}", code.to_ascii_lowercase()),
        },
        referer: None,
        headers: Headers::new(),
        transport: TransportStrategy::Standard,
    }
}

fn collector(profile: AirportProfile, transport: Arc<StaticTransport>) -> Arc<AirportCollector> {
    let transport: Arc<dyn Transport> = transport;
    Arc::new(AirportCollector::new(
        profile,
        Arc::new(FixedTransport(transport)),
        fast_policy(2),
    ))
}

fn two_valid_sfo_flights() -> Value {
    json!({
        "data": [
            {
                "id": "AAA-UA100",
                "flight_number": "UA100",
                "airline": {"iata_code": "UA", "name": "United Airlines"},
                "to_airport": "LAX",
                "scheduled_time": "2026-10-19T08:00:00",
                "status": "On Time",
                "gate": "A1"
            },
            {
                "id": "AAA-DL200",
                "flight_number": "DL200",
                "airline": {"iata_code": "DL", "name": "Delta Air Lines"},
                "from_airport": "JFK",
                "scheduled_time": "2026-10-19T09:30:00",
                "status": "Landed"
            }
        ]
    })
}

// =============================================================================
// Pipeline: mixed success and failure
// =============================================================================

#[tokio::test]
async fn when_one_airport_fails_the_others_are_still_collected_and_stored() {
    // Given: AAA serves two valid SFO-format flights, BBB's upstream is down
    let temp = tempdir().expect("tempdir");
    let store: Arc<dyn FlightStore> = Arc::new(FileSystemStore::new(temp.path()));
    let bbb_transport = StaticTransport::failing(TransportError::network("connection refused"));
    let service = CollectionService::new(Arc::clone(&store))
        .with_collector(collector(
            profile("AAA", SourceKind::Sfo),
            StaticTransport::ok(two_valid_sfo_flights()),
        ))
        .with_collector(collector(profile("BBB", SourceKind::Mia), Arc::clone(&bbb_transport)))
        .with_airports(["AAA", "BBB"]);

    // When: Every configured airport is collected
    let results = service
        .collect_all(&CollectAllOptions {
            collect: CollectOptions {
                date: Some(FLIGHT_DATE),
                ..CollectOptions::default()
            },
            ..CollectAllOptions::default()
        })
        .await
        .expect("collect_all without throw_on_error never raises");

    // Then: AAA succeeded and BBB failed, independently
    assert_eq!(results.len(), 2);
    assert!(results["AAA"].is_success());
    assert_eq!(
        results["BBB"].error().map(|error| error.kind()),
        Some("network")
    );
    assert_eq!(bbb_transport.calls.load(Ordering::SeqCst), 2, "network errors are retried");

    // And: AAA's document is on disk under the natural-key path
    let path = temp.path().join("aaa").join("aaa_flights_2026-10-19.json");
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("stored file")).expect("json");
    assert_eq!(written["data"]["count"], 2);
    assert_eq!(written["data"]["flights"][0]["direction"], "departure");
    assert_eq!(written["data"]["flights"][1]["status"], "landed");

    // And: nothing was written for BBB
    assert!(!temp.path().join("bbb").exists());
}

#[tokio::test]
async fn when_collection_repeats_the_entry_is_updated_not_duplicated() {
    // Given: A collected airport
    let temp = tempdir().expect("tempdir");
    let store: Arc<dyn FlightStore> = Arc::new(FileSystemStore::new(temp.path()));
    let service = CollectionService::new(Arc::clone(&store)).with_collector(collector(
        profile("AAA", SourceKind::Sfo),
        StaticTransport::ok(two_valid_sfo_flights()),
    ));
    let options = CollectOptions {
        date: Some(FLIGHT_DATE),
        ..CollectOptions::default()
    };
    service.collect("AAA", &options).await.expect("first run");

    let key = StorageKey::new("AAA", FlightType::Flights, FLIGHT_DATE).expect("key");
    let first = store
        .load(&key, &LoadOptions::default())
        .await
        .expect("load")
        .expect("entry");

    // When: The same airport and date is collected again
    tokio::time::sleep(Duration::from_millis(5)).await;
    service.collect("AAA", &options).await.expect("second run");

    // Then: One entry remains, with its creation time preserved
    let second = store
        .load(&key, &LoadOptions::default())
        .await
        .expect("load")
        .expect("entry");
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
    assert_eq!(second.record_count(), 2);
}

#[tokio::test]
async fn when_throw_on_error_is_set_the_failure_is_raised() {
    // Given: An airport whose upstream answers 404
    let temp = tempdir().expect("tempdir");
    let transport = StaticTransport::failing(TransportError::from_status(404, None));
    let service = CollectionService::new(Arc::new(FileSystemStore::new(temp.path())))
        .with_collector(collector(profile("BBB", SourceKind::Mia), Arc::clone(&transport)));

    // When: The caller asks for errors to be raised
    let error = service
        .collect(
            "BBB",
            &CollectOptions {
                throw_on_error: true,
                ..CollectOptions::default()
            },
        )
        .await
        .expect_err("failure is raised");

    // Then: The typed error carries the status, and 404 was not retried
    assert_eq!(error.code(), "collect.network");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Pipeline: configuration wiring
// =============================================================================

#[tokio::test]
async fn when_custom_airports_are_configured_the_service_routes_to_them() {
    // Given: Environment naming a custom airport with an SFO-format feed
    let vars = [
        ("AEROFEED_AIRPORTS", "aaa"),
        ("AEROFEED_AAA_SOURCE", "sfo"),
        ("AEROFEED_AAA_URL", "https://aaa.test/flights?date={date}"),
    ];
    let config = AppConfig::from_lookup(|name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| (*value).to_owned())
    })
    .expect("config");

    let temp = tempdir().expect("tempdir");
    let transport: Arc<dyn Transport> = StaticTransport::ok(two_valid_sfo_flights());
    let service = config.service_with(
        Arc::new(FileSystemStore::new(temp.path())),
        Arc::new(FixedTransport(transport)),
    );

    // When: The configured airport is collected
    let result = service
        .collect(
            "AAA",
            &CollectOptions {
                date: Some(FLIGHT_DATE),
                ..CollectOptions::default()
            },
        )
        .await
        .expect("collect");

    // Then: It succeeded using the configured source format
    assert!(result.is_success());
    assert_eq!(result.metadata.source, Some(SourceKind::Sfo));
    assert_eq!(service.airports(), vec![String::from("AAA")]);
}
