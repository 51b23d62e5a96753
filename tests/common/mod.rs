//! Shared fixtures: a small catalog and a fully-wired engine over
//! in-memory collaborators.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use railbook::catalog::{CarRecord, RoutePriceRow, RouteRow, TrainRecord, NULL_TIME};
use railbook::{
    BookingRequest, Catalog, CoreConfig, IdService, InMemoryCatalogSource, InMemoryOrderStore,
    InMemorySequenceStore, ManualClock, OrderEngine, OrderStore, PassengerId, PaymentGateway,
    QueryService, ScheduleRegistry, ScriptedGateway, SeatClass, SeatMeta, SequenceStore, Station,
    TrainNumber, UserId,
};
use railbook::types::Money;
use std::sync::Arc;

/// Catalog load day for every test
pub const TODAY: &str = "2024-03-01";
/// Travel day for most scenarios
pub const TRAVEL_DAY: &str = "2024-03-05";
/// Opaque payment channel used throughout
pub const PAY_CHANNEL: u32 = 1;

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("fixture date")
}

pub fn instant(s: &str) -> DateTime<Utc> {
    s.parse().expect("fixture instant")
}

pub fn fares(key: &str, per_segment: &[u64]) -> Vec<RoutePriceRow> {
    per_segment
        .iter()
        .enumerate()
        .map(|(i, cents)| RoutePriceRow {
            seat_key: key.to_string(),
            route_index: i as u8,
            price: Money::from_cents(*cents),
        })
        .collect()
}

pub fn station(code: &str, city: &str, name: &str) -> Station {
    Station::new(code.to_string(), city.to_string(), name.to_string())
}

/// Train `G1`, timetable A@08:00 → B@10:00 → C@12:00 → D@14:00, one
/// second-class car with seats `1A`, `1B` and one standing slot. Fares:
/// 100 per segment seated, 50 standing.
pub fn boundary_source() -> InMemoryCatalogSource {
    let mut prices = fares("SC", &[100, 100, 100]);
    prices.extend(fares("NST", &[50, 50, 50]));
    InMemoryCatalogSource::new()
        .with_station(station("AAA", "city-a", "Alpha"))
        .with_station(station("BBB", "city-b", "Bravo"))
        .with_station(station("CCC", "city-c", "Charlie"))
        .with_station(station("DDD", "city-d", "Delta"))
        .with_car(CarRecord {
            id: 1,
            train_type: "EMU".to_string(),
            seat_class: SeatClass::SecondClass,
            standing_capacity: 1,
            seats: vec![
                SeatMeta::new("1A".to_string(), false),
                SeatMeta::new("1B".to_string(), false),
            ],
        })
        .with_train(
            TrainRecord {
                id: 1,
                train_num: TrainNumber::from("G1"),
                schedule_every_days: 1,
                is_selling: true,
                sale_start: None,
                not_selling_remark: None,
                enable_start: date("2024-02-01"),
                enable_end: date("2024-04-30"),
                car_layout: "1:1".to_string(),
            },
            vec![
                RouteRow::stop(0, "AAA", "city-a", "Alpha", NULL_TIME, "08:00").expect("stop"),
                RouteRow::stop(1, "BBB", "city-b", "Bravo", "10:00", "10:00").expect("stop"),
                RouteRow::stop(2, "CCC", "city-c", "Charlie", "12:00", "12:00").expect("stop"),
                RouteRow::stop(3, "DDD", "city-d", "Delta", "14:00", NULL_TIME).expect("stop"),
            ],
            prices,
        )
}

pub struct TestApp {
    pub engine: Arc<OrderEngine>,
    pub query: QueryService,
    pub catalog: Arc<Catalog>,
    pub schedules: Arc<ScheduleRegistry>,
    pub store: Arc<InMemoryOrderStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: Arc<ManualClock>,
}

pub async fn app() -> TestApp {
    app_with(boundary_source(), CoreConfig::default()).await
}

pub async fn app_with(source: InMemoryCatalogSource, config: CoreConfig) -> TestApp {
    let catalog = Arc::new(
        Catalog::load(Arc::new(source), &config, date(TODAY))
            .await
            .expect("catalog load"),
    );
    let schedules = Arc::new(ScheduleRegistry::new());
    let store = Arc::new(InMemoryOrderStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let clock = Arc::new(ManualClock::new(instant("2024-03-01T09:00:00Z")));
    let sequences: Arc<dyn SequenceStore> = Arc::new(InMemorySequenceStore::new());
    let engine = Arc::new(OrderEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&schedules),
        Arc::clone(&store) as Arc<dyn OrderStore>,
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::new(IdService::new(sequences, 64)),
        Arc::clone(&clock) as Arc<dyn railbook::Clock>,
        config,
    ));
    TestApp {
        query: QueryService::new(Arc::clone(&catalog), Arc::clone(&schedules)),
        engine,
        catalog,
        schedules,
        store,
        gateway,
        clock,
    }
}

/// A G1 booking on the shared travel day.
pub fn booking(
    dep_idx: u8,
    arr_idx: u8,
    user: u64,
    passenger: u64,
    seat_class: SeatClass,
) -> BookingRequest {
    BookingRequest {
        train_num: TrainNumber::from("G1"),
        departure_date: date(TRAVEL_DAY),
        dep_idx,
        arr_idx,
        user_id: UserId::new(user),
        passenger_id: PassengerId::new(passenger),
        is_student: false,
        seat_class,
    }
}

/// Lets spawned timer tasks run to completion on the paused runtime.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
