//! Demo walkthrough: seeds a small catalog with in-memory collaborators and
//! runs a booking end to end.

use chrono::{Duration, Utc};
use railbook::catalog::{CarRecord, RoutePriceRow, RouteRow, NULL_TIME};
use railbook::{
    BookingRequest, Catalog, CoreConfig, IdService, InMemoryCatalogSource, InMemoryOrderStore,
    InMemorySequenceStore, MockPaymentGateway, Money, OrderEngine, QueryService,
    ScheduleRegistry, SeatClass, SeatMeta, Station, SystemClock, TrainNumber, UserId,
};
use railbook::catalog::TrainRecord;
use railbook::types::PassengerId;
use std::sync::Arc;

fn seat_row(prefix: &str, count: usize) -> Vec<SeatMeta> {
    (1..=count)
        .map(|i| SeatMeta::new(format!("{prefix}{i:02}"), false))
        .collect()
}

fn fares(key: &str, per_segment: &[u64]) -> Vec<RoutePriceRow> {
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

#[tokio::main]
async fn main() -> railbook::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let today = Utc::now().date_naive();
    let mut prices = fares("SC", &[12_000, 9_500, 14_000]);
    prices.extend(fares("FC", &[19_000, 15_000, 22_500]));
    let source = InMemoryCatalogSource::new()
        .with_station(Station::new("BJN".into(), "BJ".into(), "Beijing South".into()))
        .with_station(Station::new("JNX".into(), "JN".into(), "Jinan West".into()))
        .with_station(Station::new("NJN".into(), "NJ".into(), "Nanjing South".into()))
        .with_station(Station::new("SHQ".into(), "SH".into(), "Shanghai Hongqiao".into()))
        .with_car(CarRecord {
            id: 1,
            train_type: "EMU".into(),
            seat_class: SeatClass::SecondClass,
            standing_capacity: 8,
            seats: seat_row("S", 12),
        })
        .with_car(CarRecord {
            id: 2,
            train_type: "EMU".into(),
            seat_class: SeatClass::FirstClass,
            standing_capacity: 0,
            seats: seat_row("F", 6),
        })
        .with_train(
            TrainRecord {
                id: 1,
                train_num: TrainNumber::from("G21"),
                schedule_every_days: 1,
                is_selling: true,
                sale_start: None,
                not_selling_remark: None,
                enable_start: today - Duration::days(30),
                enable_end: today + Duration::days(60),
                car_layout: "1:3;2:1;1:1".into(),
            },
            vec![
                RouteRow::stop(0, "BJN", "BJ", "Beijing South", NULL_TIME, "08:00")?,
                RouteRow::stop(1, "JNX", "JN", "Jinan West", "09:32", "09:34")?,
                RouteRow::stop(2, "NJN", "NJ", "Nanjing South", "11:10", "11:12")?,
                RouteRow::stop(3, "SHQ", "SH", "Shanghai Hongqiao", "12:28", NULL_TIME)?,
            ],
            prices,
        );

    let config = CoreConfig::from_env();
    let catalog = Arc::new(Catalog::load(Arc::new(source), &config, today).await?);
    let schedules = Arc::new(ScheduleRegistry::new());
    let store = Arc::new(InMemoryOrderStore::new());
    let ids = Arc::new(IdService::new(
        Arc::new(InMemorySequenceStore::new()),
        config.id_pool_capacity,
    ));
    let engine = Arc::new(OrderEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&schedules),
        store,
        MockPaymentGateway::shared(),
        ids,
        SystemClock::shared(),
        config,
    ));
    let sweeper = engine.spawn_expiry_sweeper();

    let travel_date = today + Duration::days(1);
    let query = QueryService::new(catalog, schedules);
    let options = query.search("BJN", "SHQ", travel_date);
    println!("{}", serde_json::to_string_pretty(&options).expect("options serialize"));

    let journey = options.first().expect("G21 serves the pair");
    let order = engine
        .submit_order(BookingRequest {
            train_num: journey.train_num.clone(),
            departure_date: journey.departure_date,
            dep_idx: journey.dep_idx,
            arr_idx: journey.arr_idx,
            user_id: UserId::new(42),
            passenger_id: PassengerId::new(7),
            is_student: false,
            seat_class: SeatClass::SecondClass,
        })
        .await?;

    let paid = engine.pay(order.id, 1, "acct-42", order.price).await?;
    let (issued, ticket) = engine.check_in(paid.id).await?;
    println!(
        "issued ticket {ticket} for order {} (car {}, seat {}, {})",
        issued.id,
        issued.car_num,
        issued.seat_num.as_deref().unwrap_or("standing"),
        issued.price,
    );

    sweeper.abort();
    Ok(())
}
