#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Mutex};

use octo_usage_ingest::{config::OctopusConfig, store::ReadingStore, PipelineError};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use usage_client::{MeterPoint, Reading};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const MPAN: &str = "1200012345678";
pub const SERIAL: &str = "21L1234567";
pub const CONSUMPTION_PATH: &str =
    "/v1/electricity-meter-points/1200012345678/meters/21L1234567/consumption/";

pub fn meter() -> MeterPoint {
    MeterPoint::new(MPAN, SERIAL).unwrap()
}

pub fn octopus_config(server: &MockServer) -> OctopusConfig {
    OctopusConfig {
        base_url: server.uri(),
        api_key: "sk_live_test".to_string(),
        mpan: MPAN.to_string(),
        meter_serial: SERIAL.to_string(),
        page_size: 30,
        ..OctopusConfig::default()
    }
}

/// Half-hourly entries starting at `from`, with consumption `0.1 * (i + 1)`.
pub fn half_hour_entries(from: OffsetDateTime, count: i64) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let start = from + Duration::minutes(30 * i);
            let end = start + Duration::minutes(30);
            json!({
                "consumption": 0.1 * (i + 1) as f64,
                "interval_start": start.format(&Rfc3339).unwrap(),
                "interval_end": end.format(&Rfc3339).unwrap(),
            })
        })
        .collect()
}

pub fn page_body(results: Vec<Value>, next: Option<String>) -> Value {
    json!({
        "count": results.len(),
        "next": next,
        "previous": null,
        "results": results,
    })
}

/// Mount a first page (matched on `period_from`) that links to a second
/// page (matched on `page=2`).
pub async fn mount_two_pages(
    server: &MockServer,
    period_from: &str,
    first: Vec<Value>,
    second: Vec<Value>,
) {
    let next = format!("{}{CONSUMPTION_PATH}?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path(CONSUMPTION_PATH))
        .and(query_param("period_from", period_from))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(first, Some(next))))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(CONSUMPTION_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(second, None)))
        .mount(server)
        .await;
}

type Key = (String, String, OffsetDateTime);

/// In-memory store with the same natural-key upsert contract as the
/// Postgres table.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<Key, Reading>>,
    upsert_calls: Mutex<usize>,
    fail_upserts: bool,
}

impl MemoryStore {
    pub fn with_rows(readings: Vec<Reading>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for r in readings {
                rows.insert((r.mpan.clone(), r.meter_serial.clone(), r.interval_start), r);
            }
        }
        store
    }

    /// A store whose every upsert fails.
    pub fn failing() -> Self {
        Self {
            fail_upserts: true,
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn rows(&self) -> Vec<Reading> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn upsert_calls(&self) -> usize {
        *self.upsert_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryStore {
    async fn upsert(&self, batch: &[Reading]) -> Result<u64, PipelineError> {
        *self.upsert_calls.lock().unwrap() += 1;
        if self.fail_upserts {
            return Err(PipelineError::Persistence("connection reset".to_string()));
        }

        let mut staged = BTreeMap::new();
        for r in batch {
            staged.insert((r.mpan.clone(), r.meter_serial.clone(), r.interval_start), r.clone());
        }

        let written = staged.len() as u64;
        self.rows.lock().unwrap().extend(staged);
        Ok(written)
    }

    async fn latest_interval_start(
        &self,
        meter: &MeterPoint,
    ) -> Result<Option<OffsetDateTime>, PipelineError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(mpan, serial, _)| mpan == meter.mpan() && serial == meter.serial())
            .map(|(_, _, start)| *start)
            .max())
    }
}
