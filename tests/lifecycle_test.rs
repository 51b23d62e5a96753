//! Order lifecycle integration tests.
//!
//! Walks the boundary scenarios end to end on train `G1` (A→B→C→D, one
//! car, seats `1A`/`1B`, one standing slot): interval packing, unpaid
//! timeouts, cancellation and refund round-trips, rebooking price rules,
//! and ticket issuance.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{app, booking, date, instant, settle, PAY_CHANNEL, TRAVEL_DAY};
use chrono::Duration as ChronoDuration;
use railbook::{
    BookingError, Clock, CoreConfig, Money, NotPayableReason, OrderStatus, SeatClass, TrainNumber,
};
use railbook::store::OrderStore;
use std::time::Duration;

#[tokio::test]
async fn interval_packing_across_one_car() {
    let app = app().await;

    // A→C takes the first free seat, 1A.
    let order1 = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(order1.seat_num.as_deref(), Some("1A"));
    assert_eq!(order1.status, OrderStatus::Unpaid);
    assert_eq!(order1.price, Money::from_cents(200));

    // B→D overlaps 1A on segment B–C, so it lands on 1B.
    let order2 = app
        .engine
        .submit_order(booking(1, 3, 2, 12, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(order2.seat_num.as_deref(), Some("1B"));

    // A→D overlaps both seats; the standing slot absorbs it and the order
    // is sold as a standing ticket priced at the car's class.
    let order3 = app
        .engine
        .submit_order(booking(0, 3, 3, 13, SeatClass::SecondClass))
        .await
        .unwrap();
    assert!(order3.seat_num.is_none());
    assert_eq!(order3.seat_class, SeatClass::NoSeat);
    assert_eq!(order3.car_num, 1);
    assert_eq!(order3.price, Money::from_cents(300));

    // The standing quota on A–B is gone now.
    let err = app
        .engine
        .submit_order(booking(0, 1, 4, 14, SeatClass::NoSeat))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::NoTicketsAvailable);
}

#[tokio::test]
async fn explicit_standing_request_never_takes_a_seat() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 1, 1, 11, SeatClass::NoSeat))
        .await
        .unwrap();
    assert!(order.seat_num.is_none());
    assert_eq!(order.seat_class, SeatClass::NoSeat);
    // Standing fares have their own table.
    assert_eq!(order.price, Money::from_cents(50));

    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    let car = schedule.car(1).unwrap();
    assert!(car.seat_mask(0).is_empty());
    assert!(car.seat_mask(1).is_empty());
}

#[tokio::test(start_paused = true)]
async fn unpaid_order_times_out_and_frees_the_seat() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(order.seat_num.as_deref(), Some("1A"));

    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    settle().await;

    let stored = app.store.get(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::UnpaidTimeout);
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    assert!(schedule.car(1).unwrap().seat_mask(0).is_empty());

    // The freed seat sells again.
    let again = app
        .engine
        .submit_order(booking(0, 2, 2, 12, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(again.seat_num.as_deref(), Some("1A"));
}

#[tokio::test(start_paused = true)]
async fn paying_before_the_deadline_keeps_the_seat() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(45 * 60)).await;
    settle().await;

    let stored = app.store.get(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.pay_account.as_deref(), Some("acct-1"));
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    assert!(!schedule.car(1).unwrap().seat_mask(0).is_empty());
}

#[tokio::test]
async fn timeout_handler_is_idempotent() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();

    app.engine.expire_unpaid(order.id).await.unwrap();
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    let mask_after_first = schedule.car(1).unwrap().seat_mask(0);
    let standing_after_first = schedule.car(1).unwrap().standing_remaining();

    // Firing again must change nothing — in particular it must not release
    // the (already released) range a second time.
    app.engine.expire_unpaid(order.id).await.unwrap();
    assert_eq!(schedule.car(1).unwrap().seat_mask(0), mask_after_first);
    assert_eq!(
        schedule.car(1).unwrap().standing_remaining(),
        standing_after_first
    );
    assert_eq!(
        app.store.get(order.id).await.unwrap().unwrap().status,
        OrderStatus::UnpaidTimeout
    );

    // And a late cancel observes the timeout, not a double release.
    let err = app.engine.cancel_order(order.id).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::InvalidTransition {
            status: OrderStatus::UnpaidTimeout,
            operation: "cancel"
        }
    );
}

#[tokio::test]
async fn one_unpaid_order_per_user() {
    let app = app().await;
    app.engine
        .submit_order(booking(0, 1, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    let err = app
        .engine
        .submit_order(booking(2, 3, 1, 12, SeatClass::SecondClass))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::UnpaidOrderExists);
}

#[tokio::test]
async fn passenger_journeys_must_not_overlap() {
    let app = app().await;
    // A→C for passenger 11, booked by user 1.
    app.engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    // B→D for the same passenger bought by another user overlaps 10:00–12:00.
    let err = app
        .engine
        .submit_order(booking(1, 3, 2, 11, SeatClass::SecondClass))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::PassengerTimeConflict);

    // C→D touches the first journey only at 12:00 sharp; no conflict.
    app.engine
        .submit_order(booking(2, 3, 2, 11, SeatClass::SecondClass))
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_restores_inventory_and_counts() {
    let app = app().await;
    let schedule_before = {
        let order = app
            .engine
            .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
            .await
            .unwrap();
        let schedule = app
            .schedules
            .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
            .unwrap();
        let cancelled = app.engine.cancel_order(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        schedule
    };
    let car = schedule_before.car(1).unwrap();
    assert!(car.seat_mask(0).is_empty());
    assert!(car.seat_mask(1).is_empty());
    assert_eq!(car.standing_remaining(), vec![1, 1, 1]);

    // Three cancellations exhaust the daily allowance…
    for _ in 0..2 {
        let order = app
            .engine
            .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
            .await
            .unwrap();
        app.engine.cancel_order(order.id).await.unwrap();
    }
    let err = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::DailyCancelLimitExceeded { limit: 3 });

    // …until the day rolls over.
    app.clock.advance(ChronoDuration::days(1));
    app.engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
}

#[tokio::test]
async fn payment_validation_and_refund_round_trip() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();

    let err = app
        .engine
        .pay(order.id, PAY_CHANNEL, "acct-1", Money::from_cents(150))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::PriceMismatch {
            expected: Money::from_cents(200),
            offered: Money::from_cents(150),
        }
    );

    app.gateway.decline_next_charge();
    let err = app
        .engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PaymentFailed { .. }));

    let paid = app
        .engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);

    let err = app
        .engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::OrderNotPayable {
            reason: NotPayableReason::AlreadyPaid
        }
    );

    // Refund restores the seat and counts toward the daily allowance.
    let refunded = app.engine.refund(order.id).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    assert!(schedule.car(1).unwrap().seat_mask(0).is_empty());
    assert_eq!(
        app.store
            .cancel_count(order.user_id, app.clock.now().date_naive())
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn rebooking_to_a_cheaper_journey_settles_immediately() {
    let app = app().await;
    // A→D at 300, paid.
    let source = app
        .engine
        .submit_order(booking(0, 3, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(source.price, Money::from_cents(300));
    app.engine
        .pay(source.id, PAY_CHANNEL, "acct-1", source.price)
        .await
        .unwrap();

    // Rebook to A→B at 100: difference refunded, chain settled.
    let change = app
        .engine
        .change(source.id, booking(0, 1, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(change.status, OrderStatus::ChangePaid);
    assert_eq!(change.price, Money::from_cents(100));
    assert_eq!(change.source_order_id, Some(source.id));

    let source_now = app.store.get(source.id).await.unwrap().unwrap();
    assert_eq!(source_now.status, OrderStatus::Changed);
    assert_eq!(source_now.change_order_id, Some(change.id));

    // The old A→D range is free again; only A→B is held.
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    let car = schedule.car(1).unwrap();
    assert_eq!(car.availability(1, 3).seats, 2);
    assert_eq!(car.availability(0, 1).seats, 1);

    // One rebooking per chain, from either end.
    let err = app
        .engine
        .change(source.id, booking(2, 3, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::AlreadyChanged);
    let err = app
        .engine
        .change(change.id, booking(2, 3, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::AlreadyChanged);
}

#[tokio::test(start_paused = true)]
async fn rebooking_to_a_dearer_journey_collects_the_delta() {
    let app = app().await;
    // A→B at 100, paid.
    let source = app
        .engine
        .submit_order(booking(0, 1, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(source.id, PAY_CHANNEL, "acct-1", source.price)
        .await
        .unwrap();

    // Rebook to A→D at 300: the new order carries the 200 delta.
    let change = app
        .engine
        .change(source.id, booking(0, 3, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(change.status, OrderStatus::ChangeUnpaid);
    assert_eq!(change.price, Money::from_cents(200));

    // The source stays paid until the delta settles.
    assert_eq!(
        app.store.get(source.id).await.unwrap().unwrap().status,
        OrderStatus::Paid
    );

    // Unpaid delta times out: new reservation released, source untouched.
    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    settle().await;
    assert_eq!(
        app.store.get(change.id).await.unwrap().unwrap().status,
        OrderStatus::ChangeUnpaidTimeout
    );
    assert_eq!(
        app.store.get(source.id).await.unwrap().unwrap().status,
        OrderStatus::Paid
    );
    let schedule = app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .unwrap();
    let car = schedule.car(1).unwrap();
    // Only the source's A→B segment is still held.
    assert_eq!(car.availability(1, 3).seats, 2);
    assert_eq!(car.availability(0, 1).seats, 1);
}

#[tokio::test]
async fn paying_the_delta_settles_the_chain() {
    let app = app().await;
    let source = app
        .engine
        .submit_order(booking(0, 1, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(source.id, PAY_CHANNEL, "acct-1", source.price)
        .await
        .unwrap();
    let change = app
        .engine
        .change(source.id, booking(0, 3, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();

    let paid = app
        .engine
        .pay(change.id, PAY_CHANNEL, "acct-1", change.price)
        .await
        .unwrap();
    assert_eq!(paid.status, OrderStatus::ChangePaid);
    assert_eq!(
        app.store.get(source.id).await.unwrap().unwrap().status,
        OrderStatus::Changed
    );
}

#[tokio::test]
async fn check_in_issues_a_sharded_ticket() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 17, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();

    let (issued, ticket) = app.engine.check_in(order.id).await.unwrap();
    assert_eq!(issued.status, OrderStatus::Issued);
    // The ticket id routes on passenger 17 → low nibble 7.
    assert_eq!(ticket.get() & 0xF, 7);

    let err = app.engine.check_in(order.id).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::InvalidTransition {
            status: OrderStatus::Issued,
            operation: "check in"
        }
    );
}

#[tokio::test]
async fn expiry_sweep_closes_concluded_journeys_without_freeing_seats() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();
    app.engine.check_in(order.id).await.unwrap();

    // Journeys still under way are untouched.
    assert_eq!(app.engine.sweep_expired().await.unwrap(), 0);

    // Past the arrival the order expires and the concluded instance is
    // retired wholesale — nothing releases its seats one by one.
    app.clock.set(instant("2024-03-06T00:00:00Z"));
    assert_eq!(app.engine.sweep_expired().await.unwrap(), 1);
    assert_eq!(
        app.store.get(order.id).await.unwrap().unwrap().status,
        OrderStatus::Expired
    );
    assert!(app
        .schedules
        .get(&TrainNumber::from("G1"), date(TRAVEL_DAY))
        .is_none());
}

#[tokio::test]
async fn refund_after_issue_follows_policy() {
    let mut config = CoreConfig::default();
    config.allow_refund_after_issue = false;
    let app = common::app_with(common::boundary_source(), config).await;

    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();
    app.engine.check_in(order.id).await.unwrap();

    let err = app.engine.refund(order.id).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::InvalidTransition {
            status: OrderStatus::Issued,
            operation: "refund"
        }
    );
}

#[tokio::test]
async fn rehydration_rebuilds_seat_state() {
    let app = app().await;
    let order = app
        .engine
        .submit_order(booking(0, 2, 1, 11, SeatClass::SecondClass))
        .await
        .unwrap();
    app.engine
        .pay(order.id, PAY_CHANNEL, "acct-1", order.price)
        .await
        .unwrap();

    // A "restarted" engine over the same store but fresh schedules.
    let fresh = common::app_with(common::boundary_source(), CoreConfig::default()).await;
    let restarted = std::sync::Arc::new(railbook::OrderEngine::new(
        std::sync::Arc::clone(&fresh.catalog),
        std::sync::Arc::clone(&fresh.schedules),
        std::sync::Arc::clone(&app.store) as std::sync::Arc<dyn OrderStore>,
        std::sync::Arc::clone(&app.gateway) as std::sync::Arc<dyn railbook::PaymentGateway>,
        std::sync::Arc::new(railbook::IdService::new(
            std::sync::Arc::new(railbook::InMemorySequenceStore::new()),
            64,
        )),
        std::sync::Arc::clone(&app.clock) as std::sync::Arc<dyn railbook::Clock>,
        CoreConfig::default(),
    ));
    assert_eq!(restarted.rehydrate().await.unwrap(), 1);

    // The restored mask blocks the overlapping range again.
    let rebooked = restarted
        .submit_order(booking(1, 2, 2, 12, SeatClass::SecondClass))
        .await
        .unwrap();
    assert_eq!(rebooked.seat_num.as_deref(), Some("1B"));
}
