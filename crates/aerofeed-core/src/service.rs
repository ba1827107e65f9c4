use std::collections::BTreeMap;
use std::sync::Arc;

use aerofeed_storage::key::format_timestamp;
use aerofeed_storage::{FlightStore, SaveOptions, StorageKey};
use futures::{stream, StreamExt};

use crate::{
    CollectError, CollectOptions, CollectRequest, CollectedPayload, CollectionMetadata,
    CollectionResult, Collector,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Receives every collection result once it is final (after persistence).
///
/// This is the boundary for webhook delivery and live-update broadcast.
pub trait CollectionListener: Send + Sync {
    fn on_collected(&self, result: &CollectionResult);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectAllOptions {
    /// Airports to collect; the configured list when `None`.
    pub airports: Option<Vec<String>>,
    pub collect: CollectOptions,
    /// Maximum airports in flight at once; ignored with `throw_on_error`.
    pub concurrency: Option<usize>,
}

/// Routes airports to collectors and persists what they return.
pub struct CollectionService {
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<dyn FlightStore>,
    airports: Vec<String>,
    listeners: Vec<Arc<dyn CollectionListener>>,
    concurrency: usize,
}

impl CollectionService {
    pub fn new(store: Arc<dyn FlightStore>) -> Self {
        Self {
            collectors: Vec::new(),
            store,
            airports: Vec::new(),
            listeners: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Sets the airports `collect_all` visits by default.
    pub fn with_airports<I, S>(mut self, airports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.airports = normalize(airports);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn CollectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn FlightStore> {
        &self.store
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    /// Configured airports, or every collector's airport when none are configured.
    pub fn airports(&self) -> Vec<String> {
        if self.airports.is_empty() {
            normalize(self.collectors.iter().map(|collector| collector.airport()))
        } else {
            self.airports.clone()
        }
    }

    /// Collects one airport and persists the result.
    ///
    /// Returns `Err` only when `options.throw_on_error` is set; otherwise
    /// failures are reported inside the returned result.
    pub async fn collect(
        &self,
        airport: &str,
        options: &CollectOptions,
    ) -> Result<CollectionResult, CollectError> {
        let request = CollectRequest {
            airport: airport.trim().to_ascii_uppercase(),
            date: options.flight_date(),
        };
        let options = CollectOptions {
            date: Some(request.date),
            ..options.clone()
        };

        let result = match self
            .collectors
            .iter()
            .find(|collector| collector.can_handle(&request))
        {
            Some(collector) => {
                let result = collector.collect(&options).await;
                let persisted = match result.payload() {
                    Some(payload) => self.persist(&result.metadata, payload, options.test).await,
                    None => Ok(()),
                };
                match persisted {
                    Ok(()) => result,
                    Err(error) => {
                        tracing::error!(
                            airport = %request.airport,
                            code = error.code(),
                            error = %error,
                            "failed to persist collection"
                        );
                        result.into_failure(error)
                    }
                }
            }
            None => {
                tracing::warn!(airport = %request.airport, "no collector configured");
                CollectionResult::failure(
                    CollectionMetadata::new(request.airport.clone(), request.date),
                    CollectError::UnknownAirport(request.airport.clone()),
                )
            }
        };

        for listener in &self.listeners {
            listener.on_collected(&result);
        }

        match result.error() {
            Some(error) if options.throw_on_error => Err(error.clone()),
            _ => Ok(result),
        }
    }

    /// Collects every requested airport, isolating failures per airport.
    ///
    /// With `throw_on_error` airports run one at a time and the first failure
    /// stops the run.
    pub async fn collect_all(
        &self,
        options: &CollectAllOptions,
    ) -> Result<BTreeMap<String, CollectionResult>, CollectError> {
        let airports = match &options.airports {
            Some(airports) => normalize(airports),
            None => self.airports(),
        };
        let collect = CollectOptions {
            date: Some(options.collect.flight_date()),
            ..options.collect.clone()
        };
        let concurrency = options.concurrency.unwrap_or(self.concurrency).max(1);

        let mut results = BTreeMap::new();
        if collect.throw_on_error || concurrency == 1 {
            for airport in airports {
                let result = self.collect(&airport, &collect).await?;
                results.insert(airport, result);
            }
        } else {
            let collect = &collect;
            let finished: Vec<_> = stream::iter(airports)
                .map(|airport| async move {
                    let result = self.collect(&airport, collect).await;
                    (airport, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for (airport, result) in finished {
                results.insert(airport, result?);
            }
        }

        let failed = results.values().filter(|result| !result.is_success()).count();
        tracing::info!(airports = results.len(), failed, "collection run finished");
        Ok(results)
    }

    async fn persist(
        &self,
        metadata: &CollectionMetadata,
        payload: &CollectedPayload,
        test: bool,
    ) -> Result<(), CollectError> {
        let backend = self.store.backend();
        let collected_at = format_timestamp(metadata.collected_at);
        let save_options = SaveOptions {
            collection_date: Some(collected_at.clone()),
            message: Some(format!(
                "Update {} flights for {}",
                metadata.airport, metadata.flight_date
            )),
        };

        for (flight_type, document) in
            payload.documents(&metadata.airport, metadata.flight_date, &collected_at)
        {
            let storage_error = |key: String, message: String| CollectError::Storage {
                key,
                backend,
                message,
            };

            let key = StorageKey::new(&metadata.airport, flight_type, metadata.flight_date)
                .map_err(|error| {
                    storage_error(
                        format!("{}/{flight_type}/{}", metadata.airport, metadata.flight_date),
                        error.to_string(),
                    )
                })?;
            let key = if test {
                key.for_test_run(metadata.collected_at)
            } else {
                key
            };

            let entry = self
                .store
                .save(&key, &document, &save_options)
                .await
                .map_err(|error| storage_error(key.to_string(), error.to_string()))?;
            tracing::info!(
                key = %key,
                backend = %backend,
                records = entry.record_count(),
                "stored collection"
            );
        }
        Ok(())
    }
}

fn normalize<I, S>(airports: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for airport in airports {
        let airport = airport.as_ref().trim().to_ascii_uppercase();
        if !airport.is_empty() && !normalized.contains(&airport) {
            normalized.push(airport);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use aerofeed_storage::{
        FileSystemStore, FlightType, LoadOptions, StorageBackend, StorageError, StoreFuture,
        StoredFlightEntry,
    };
    use serde_json::Value;
    use time::macros::date;

    use super::*;
    use crate::{Airline, CollectFuture, FlightDirection, FlightRecord, FlightStatus};

    struct StubCollector {
        airport: &'static str,
        fail: bool,
    }

    impl Collector for StubCollector {
        fn airport(&self) -> &str {
            self.airport
        }

        fn can_handle(&self, request: &CollectRequest) -> bool {
            request.airport == self.airport
        }

        fn collect<'a>(&'a self, options: &'a CollectOptions) -> CollectFuture<'a> {
            Box::pin(async move {
                let metadata = CollectionMetadata::new(self.airport, options.flight_date());
                if self.fail {
                    return CollectionResult::failure(
                        metadata,
                        CollectError::Network {
                            message: String::from("connection refused"),
                            status: None,
                        },
                    );
                }
                let flight = FlightRecord {
                    id: format!("{}-1", self.airport),
                    flight_number: String::from("XX1"),
                    airline: Airline {
                        code: String::from("XX"),
                        name: String::from("Example Air"),
                    },
                    origin: self.airport.to_owned(),
                    destination: String::from("LAX"),
                    scheduled_time: String::from("2026-10-19T08:00"),
                    actual_time: None,
                    status: FlightStatus::Scheduled,
                    gate: None,
                    terminal: None,
                    direction: Some(FlightDirection::Departure),
                    aircraft_type: None,
                    metadata: BTreeMap::new(),
                };
                CollectionResult::success(metadata, CollectedPayload::flights(vec![flight]))
            })
        }
    }

    struct BrokenStore;

    impl FlightStore for BrokenStore {
        fn backend(&self) -> StorageBackend {
            StorageBackend::Sqlite
        }

        fn save<'a>(
            &'a self,
            _key: &'a StorageKey,
            _data: &'a Value,
            _options: &'a SaveOptions,
        ) -> StoreFuture<'a, StoredFlightEntry> {
            Box::pin(async {
                Err(StorageError::Task(String::from("database is locked")))
            })
        }

        fn load<'a>(
            &'a self,
            _key: &'a StorageKey,
            _options: &'a LoadOptions,
        ) -> StoreFuture<'a, Option<StoredFlightEntry>> {
            Box::pin(async { Ok(None) })
        }

        fn exists<'a>(&'a self, _key: &'a StorageKey) -> StoreFuture<'a, bool> {
            Box::pin(async { Ok(false) })
        }

        fn delete<'a>(&'a self, _key: &'a StorageKey) -> StoreFuture<'a, bool> {
            Box::pin(async { Ok(false) })
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl CollectionListener for RecordingListener {
        fn on_collected(&self, result: &CollectionResult) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((result.metadata.airport.clone(), result.is_success()));
            }
        }
    }

    fn options() -> CollectOptions {
        CollectOptions {
            date: Some(date!(2026 - 10 - 19)),
            ..CollectOptions::default()
        }
    }

    fn service(store: Arc<dyn FlightStore>) -> CollectionService {
        CollectionService::new(store)
            .with_collector(Arc::new(StubCollector {
                airport: "AAA",
                fail: false,
            }))
            .with_collector(Arc::new(StubCollector {
                airport: "BBB",
                fail: true,
            }))
    }

    #[tokio::test]
    async fn successful_collection_is_persisted_under_its_natural_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn FlightStore> = Arc::new(FileSystemStore::new(temp.path()));
        let service = service(Arc::clone(&store));

        let result = service.collect("aaa", &options()).await.expect("collect");
        assert!(result.is_success());

        let key = StorageKey::new("AAA", FlightType::Flights, date!(2026 - 10 - 19)).expect("key");
        let entry = store
            .load(&key, &LoadOptions::default())
            .await
            .expect("load")
            .expect("stored entry");
        assert_eq!(entry.record_count(), 1);
        assert_eq!(entry.data["airport"], "AAA");
    }

    #[tokio::test]
    async fn test_runs_do_not_touch_production_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn FlightStore> = Arc::new(FileSystemStore::new(temp.path()));
        let service = service(Arc::clone(&store));

        let options = CollectOptions {
            test: true,
            ..options()
        };
        service.collect("AAA", &options).await.expect("collect");

        let key = StorageKey::new("AAA", FlightType::Flights, date!(2026 - 10 - 19)).expect("key");
        assert!(!store.exists(&key).await.expect("exists"));
        assert!(temp.path().join("test").join("aaa").is_dir());
    }

    #[tokio::test]
    async fn unknown_airport_fails_or_raises() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service = service(Arc::new(FileSystemStore::new(temp.path())));

        let result = service.collect("ZZZ", &options()).await.expect("result");
        assert_eq!(result.error().map(CollectError::kind), Some("unknown_airport"));

        let raising = CollectOptions {
            throw_on_error: true,
            ..options()
        };
        let error = service.collect("ZZZ", &raising).await.expect_err("raises");
        assert_eq!(error, CollectError::UnknownAirport(String::from("ZZZ")));
    }

    #[tokio::test]
    async fn storage_failure_turns_result_into_failure() {
        let service = service(Arc::new(BrokenStore));

        let result = service.collect("AAA", &options()).await.expect("result");
        match result.error() {
            Some(CollectError::Storage { key, backend, .. }) => {
                assert_eq!(key, "AAA/flights/2026-10-19");
                assert_eq!(*backend, StorageBackend::Sqlite);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_all_isolates_failures_and_notifies_listeners() {
        let temp = tempfile::tempdir().expect("tempdir");
        let listener = Arc::new(RecordingListener::default());
        let service = service(Arc::new(FileSystemStore::new(temp.path())))
            .with_listener(Arc::clone(&listener) as Arc<dyn CollectionListener>);

        let results = service
            .collect_all(&CollectAllOptions {
                collect: options(),
                concurrency: Some(2),
                ..CollectAllOptions::default()
            })
            .await
            .expect("collect all");

        assert_eq!(results.len(), 2);
        assert!(results["AAA"].is_success());
        assert!(!results["BBB"].is_success());

        let seen = listener.seen.lock().expect("listener lock");
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn collect_all_with_throw_on_error_stops_at_first_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service = service(Arc::new(FileSystemStore::new(temp.path())));

        let error = service
            .collect_all(&CollectAllOptions {
                airports: Some(vec![String::from("bbb"), String::from("aaa")]),
                collect: CollectOptions {
                    throw_on_error: true,
                    ..options()
                },
                concurrency: None,
            })
            .await
            .expect_err("first failure raises");
        assert_eq!(error.kind(), "network");
    }

    #[test]
    fn airports_default_to_collector_codes() {
        let service = service(Arc::new(BrokenStore)).with_concurrency(0);
        assert_eq!(service.airports(), vec![String::from("AAA"), String::from("BBB")]);

        let service = service.with_airports(["bbb", " BBB ", ""]);
        assert_eq!(service.airports(), vec![String::from("BBB")]);
    }
}
