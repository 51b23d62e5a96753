//! Query and timetable-matching integration tests: city-granularity
//! matching with exact-station refinement, intercity exact matching,
//! run cadence, cross-midnight boardings, and availability snapshots.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{app, app_with, booking, date, fares, station, PAY_CHANNEL};
use railbook::catalog::{CarRecord, RouteRow, TrainRecord, NULL_TIME};
use railbook::{
    BookingRequest, CoreConfig, InMemoryCatalogSource, Money, PassengerId, SeatClass, SeatMeta,
    TrainNumber, UserId,
};

fn seat(num: &str) -> SeatMeta {
    SeatMeta::new(num.to_string(), false)
}

fn plain_car(id: u32, class: SeatClass, seats: &[&str], standing: u16) -> CarRecord {
    CarRecord {
        id,
        train_type: "through".to_string(),
        seat_class: class,
        standing_capacity: standing,
        seats: seats.iter().map(|n| seat(n)).collect(),
    }
}

fn record(id: u64, num: &str, every_days: u32, start: &str, end: &str) -> TrainRecord {
    TrainRecord {
        id,
        train_num: TrainNumber::from(num),
        schedule_every_days: every_days,
        is_selling: true,
        sale_start: None,
        not_selling_remark: None,
        enable_start: date(start),
        enable_end: date(end),
        car_layout: "1:1".to_string(),
    }
}

/// `K100` stops twice in city X (stations X1, X2) before city Y.
fn twin_city_source() -> InMemoryCatalogSource {
    InMemoryCatalogSource::new()
        .with_station(station("X1", "city-x", "X One"))
        .with_station(station("X2", "city-x", "X Two"))
        .with_station(station("X3", "city-x", "X Three"))
        .with_station(station("Y1", "city-y", "Y One"))
        .with_car(plain_car(1, SeatClass::HardSeat, &["01", "02"], 2))
        .with_train(
            record(1, "K100", 1, "2024-02-01", "2024-04-30"),
            vec![
                RouteRow::stop(0, "X1", "city-x", "X One", NULL_TIME, "08:00").expect("stop"),
                RouteRow::stop(1, "X2", "city-x", "X Two", "08:25", "08:30").expect("stop"),
                RouteRow::stop(2, "Y1", "city-y", "Y One", "12:00", NULL_TIME).expect("stop"),
            ],
            fares("HST", &[400, 800]),
        )
}

#[tokio::test]
async fn city_match_refines_to_the_exact_station() {
    let app = app_with(twin_city_source(), CoreConfig::default()).await;

    // Exact code X1 boards at the city's first stop.
    let options = app.query.search("X1", "Y1", date("2024-03-05"));
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].dep_idx, 0);
    assert_eq!(options[0].arr_idx, 2);

    // Exact code X2 refines the candidate to the later same-city stop.
    let options = app.query.search("X2", "Y1", date("2024-03-05"));
    assert_eq!(options[0].dep_idx, 1);
    assert_eq!(options[0].prices["HST"], Money::from_cents(800));

    // A city-X station the train never calls at still matches the city;
    // boarding falls back to the city's first stop.
    let options = app.query.search("X3", "Y1", date("2024-03-05"));
    assert_eq!(options[0].dep_idx, 0);
    assert_eq!(options[0].prices["HST"], Money::from_cents(1_200));
}

#[tokio::test]
async fn unknown_station_codes_match_nothing() {
    let app = app_with(twin_city_source(), CoreConfig::default()).await;
    assert!(app.query.search("ZZ", "Y1", date("2024-03-05")).is_empty());
    assert!(app.query.search("X1", "ZZ", date("2024-03-05")).is_empty());
}

/// `C100` is intercity: both endpoints must match by exact station code.
fn intercity_source() -> InMemoryCatalogSource {
    InMemoryCatalogSource::new()
        .with_station(station("CA1", "city-c", "Coast North"))
        .with_station(station("CA2", "city-c", "Coast East"))
        .with_station(station("CB1", "city-c", "Coast South"))
        .with_car(plain_car(1, SeatClass::SecondClass, &["01A"], 0))
        .with_train(
            record(1, "C100", 1, "2024-02-01", "2024-04-30"),
            vec![
                RouteRow::stop(0, "CA1", "city-c", "Coast North", NULL_TIME, "07:00")
                    .expect("stop"),
                RouteRow::stop(1, "CB1", "city-c", "Coast South", "07:40", NULL_TIME)
                    .expect("stop"),
            ],
            fares("SC", &[150]),
        )
}

#[tokio::test]
async fn intercity_requires_exact_station_codes() {
    let app = app_with(intercity_source(), CoreConfig::default()).await;

    let options = app.query.search("CA1", "CB1", date("2024-03-05"));
    assert_eq!(options.len(), 1);

    // CA2 shares the city with every stop but is not on the route.
    assert!(app.query.search("CA2", "CB1", date("2024-03-05")).is_empty());
    assert!(app.query.search("CA1", "CA2", date("2024-03-05")).is_empty());
}

#[tokio::test]
async fn alternate_day_trains_respect_their_cadence() {
    let source = InMemoryCatalogSource::new()
        .with_station(station("P1", "city-p", "Pier"))
        .with_station(station("Q1", "city-q", "Quay"))
        .with_car(plain_car(1, SeatClass::SecondClass, &["01A"], 0))
        .with_train(
            record(1, "T200", 2, "2024-01-01", "2024-06-30"),
            vec![
                RouteRow::stop(0, "P1", "city-p", "Pier", NULL_TIME, "09:00").expect("stop"),
                RouteRow::stop(1, "Q1", "city-q", "Quay", "11:00", NULL_TIME).expect("stop"),
            ],
            fares("SC", &[250]),
        );
    let app = app_with(source, CoreConfig::default()).await;

    // Odd offsets from enable_start are off-cadence.
    assert!(app.query.search("P1", "Q1", date("2024-01-02")).is_empty());
    let options = app.query.search("P1", "Q1", date("2024-01-03"));
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].departure_date, date("2024-01-03"));
}

/// Overnight `Z50`: departs 22:00, reaches M at 01:30 the next day.
fn overnight_source() -> InMemoryCatalogSource {
    InMemoryCatalogSource::new()
        .with_station(station("N1", "city-n", "North"))
        .with_station(station("M1", "city-m", "Middle"))
        .with_station(station("S1", "city-s", "South"))
        .with_car(plain_car(1, SeatClass::HardSeat, &["01", "02"], 0))
        .with_train(
            record(1, "Z50", 1, "2024-02-01", "2024-04-30"),
            vec![
                RouteRow::stop(0, "N1", "city-n", "North", NULL_TIME, "22:00").expect("stop"),
                RouteRow::stop(1, "M1", "city-m", "Middle", "01:30", "01:40").expect("stop"),
                RouteRow::stop(2, "S1", "city-s", "South", "05:00", NULL_TIME).expect("stop"),
            ],
            fares("HST", &[300, 300]),
        )
}

#[tokio::test]
async fn boarding_after_midnight_belongs_to_the_previous_run() {
    let app = app_with(overnight_source(), CoreConfig::default()).await;

    // Boarding M on the 6th rides the run that left N on the 5th.
    let options = app.query.search("M1", "S1", date("2024-03-06"));
    assert_eq!(options.len(), 1);
    let journey = &options[0];
    assert_eq!(journey.departure_date, date("2024-03-05"));
    assert_eq!(journey.dep_idx, 1);
    assert_eq!(
        journey.dep_time,
        common::instant("2024-03-06T01:40:00Z")
    );
    assert_eq!(
        journey.arr_time,
        common::instant("2024-03-06T05:00:00Z")
    );

    // A booking made from that option lands on the 5th's instance.
    let order = app
        .engine
        .submit_order(BookingRequest {
            train_num: journey.train_num.clone(),
            departure_date: journey.departure_date,
            dep_idx: journey.dep_idx,
            arr_idx: journey.arr_idx,
            user_id: UserId::new(1),
            passenger_id: PassengerId::new(11),
            is_student: false,
            seat_class: SeatClass::HardSeat,
        })
        .await
        .unwrap();
    assert_eq!(order.departure_date, date("2024-03-05"));
    assert!(app
        .schedules
        .get(&TrainNumber::from("Z50"), date("2024-03-05"))
        .is_some());
}

#[tokio::test]
async fn availability_reflects_live_bookings() {
    let app = app().await;
    let before = app.query.search("AAA", "CCC", date(common::TRAVEL_DAY));
    assert_eq!(before.len(), 1);
    let avail = before[0].availability[&SeatClass::SecondClass];
    assert_eq!(avail.seats, 2);
    assert_eq!(avail.standing, 1);

    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();

    let after = app.query.search("AAA", "CCC", date(common::TRAVEL_DAY));
    let avail = after[0].availability[&SeatClass::SecondClass];
    assert_eq!(avail.seats, 1);
    assert_eq!(avail.standing, 1);

    // Disjoint tail range is untouched.
    let tail = app.query.search("CCC", "DDD", date(common::TRAVEL_DAY));
    assert_eq!(tail[0].availability[&SeatClass::SecondClass].seats, 2);
}

/// Sleeper fares are keyed per berth tier.
fn sleeper_source() -> InMemoryCatalogSource {
    let mut prices = fares("HS-U", &[900, 900]);
    prices.extend(fares("HS-L", &[1_000, 1_000]));
    InMemoryCatalogSource::new()
        .with_station(station("N1", "city-n", "North"))
        .with_station(station("M1", "city-m", "Middle"))
        .with_station(station("S1", "city-s", "South"))
        .with_car(CarRecord {
            id: 1,
            train_type: "through".to_string(),
            seat_class: SeatClass::HardSleeper,
            standing_capacity: 0,
            seats: vec![seat("1-U1"), seat("1-L1")],
        })
        .with_train(
            record(1, "K300", 1, "2024-02-01", "2024-04-30"),
            vec![
                RouteRow::stop(0, "N1", "city-n", "North", NULL_TIME, "10:00").expect("stop"),
                RouteRow::stop(1, "M1", "city-m", "Middle", "14:00", "14:05").expect("stop"),
                RouteRow::stop(2, "S1", "city-s", "South", "18:00", NULL_TIME).expect("stop"),
            ],
            prices,
        )
}

#[tokio::test]
async fn berth_tiers_price_separately() {
    let app = app_with(sleeper_source(), CoreConfig::default()).await;

    let options = app.query.search("N1", "S1", date("2024-03-05"));
    assert_eq!(options[0].prices["HS-U"], Money::from_cents(1_800));
    assert_eq!(options[0].prices["HS-L"], Money::from_cents(2_000));

    // The first booking takes the upper berth and prices off its tier.
    let upper = app
        .engine
        .submit_order(BookingRequest {
            train_num: TrainNumber::from("K300"),
            departure_date: date("2024-03-05"),
            dep_idx: 0,
            arr_idx: 2,
            user_id: UserId::new(1),
            passenger_id: PassengerId::new(11),
            is_student: false,
            seat_class: SeatClass::HardSleeper,
        })
        .await
        .unwrap();
    assert_eq!(upper.seat_num.as_deref(), Some("1-U1"));
    assert_eq!(upper.price, Money::from_cents(1_800));

    let lower = app
        .engine
        .submit_order(BookingRequest {
            train_num: TrainNumber::from("K300"),
            departure_date: date("2024-03-05"),
            dep_idx: 0,
            arr_idx: 2,
            user_id: UserId::new(2),
            passenger_id: PassengerId::new(12),
            is_student: false,
            seat_class: SeatClass::HardSleeper,
        })
        .await
        .unwrap();
    assert_eq!(lower.seat_num.as_deref(), Some("1-L1"));
    assert_eq!(lower.price, Money::from_cents(2_000));
}
