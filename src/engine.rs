//! The order engine: booking, payment, cancellation, refund, rebooking,
//! ticket issuance, and the timers that keep them honest.
//!
//! Every status transition goes through the order store as a
//! compare-and-set, so the unpaid-timeout task and user-driven operations
//! can race freely: whichever lands first wins and the loser observes a
//! no-op. Timers are never cancelled — the status guard makes firing them
//! late harmless.
//!
//! Seat side effects roll back inline: any failure after a reservation
//! succeeded releases exactly the segments it took before the error
//! surfaces.

use crate::catalog::{Catalog, TrainInfo};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::{BookingError, NotPayableReason, Result};
use crate::idgen::IdService;
use crate::payment::PaymentGateway;
use crate::schedule::{ScheduleInstance, ScheduleRegistry};
use crate::store::OrderStore;
use crate::types::{
    Order, OrderId, OrderStatus, PassengerId, SeatClass, TicketId, TrainNumber, UserId,
    ACTIVE_STATUSES,
};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

/// Inputs for booking (and rebooking) one passenger onto one journey.
#[derive(Clone, Debug)]
pub struct BookingRequest {
    /// Train number
    pub train_num: TrainNumber,
    /// Departure date of the train's origin station
    pub departure_date: NaiveDate,
    /// Boarding station index
    pub dep_idx: u8,
    /// Alighting station index
    pub arr_idx: u8,
    /// Purchasing user
    pub user_id: UserId,
    /// Travelling passenger
    pub passenger_id: PassengerId,
    /// Whether student-fare seats are acceptable
    pub is_student: bool,
    /// Requested seat class
    pub seat_class: SeatClass,
}

/// What the reservation step locked, so later steps can commit or undo it.
struct ReservedSlot {
    car_num: u8,
    car_class: SeatClass,
    seat: Option<(usize, String)>,
}

/// The reservation core's order state machine.
pub struct OrderEngine {
    catalog: Arc<Catalog>,
    schedules: Arc<ScheduleRegistry>,
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    ids: Arc<IdService>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl OrderEngine {
    /// Wires the engine to its collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        schedules: Arc<ScheduleRegistry>,
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        ids: Arc<IdService>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        Self {
            catalog,
            schedules,
            store,
            gateway,
            ids,
            clock,
            config,
        }
    }

    /// The catalog handle this engine books against
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The schedule registry this engine books against
    #[must_use]
    pub fn schedules(&self) -> &Arc<ScheduleRegistry> {
        &self.schedules
    }

    // ========================================================================
    // SubmitOrder
    // ========================================================================

    /// Books one passenger onto one journey.
    ///
    /// Preconditions are checked in a fixed order, each with its own error:
    /// daily cancel cap, no unpaid order, train exists on the date, no
    /// passenger time overlap, class exists on the train. The reservation
    /// then tries every car of the class for a seat, falling back to a
    /// standing slot; standing orders are persisted as
    /// [`SeatClass::NoSeat`].
    ///
    /// On success the order is `Unpaid` and a timeout task is scheduled; if
    /// it is still unpaid when the deadline hits, the reservation is
    /// released again.
    ///
    /// # Errors
    ///
    /// See [`BookingError`]; a failed booking leaves inventory untouched.
    pub async fn submit_order(self: &Arc<Self>, req: BookingRequest) -> Result<Order> {
        let now = self.clock.now();

        let cancels = self
            .store
            .cancel_count(req.user_id, now.date_naive())
            .await?;
        if cancels >= self.config.daily_cancel_limit {
            return Err(BookingError::DailyCancelLimitExceeded {
                limit: self.config.daily_cancel_limit,
            });
        }
        if self.store.unpaid_count(req.user_id).await? > 0 {
            return Err(BookingError::UnpaidOrderExists);
        }

        let train = self.lookup_train(&req)?;
        let (dep_time, arr_time) =
            train.dep_arr_times(req.departure_date, req.dep_idx, req.arr_idx);
        if self
            .store
            .has_time_conflict(req.passenger_id, dep_time, arr_time, None)
            .await?
        {
            return Err(BookingError::PassengerTimeConflict);
        }
        Self::check_seat_class(&train, req.seat_class)?;

        let schedule = self.schedules.instance(&train, req.departure_date);
        let reserved = self.reserve(&schedule, &req)?;

        match self
            .finalize_order(&train, &req, &reserved, None)
            .await
        {
            Ok(order) => {
                self.spawn_unpaid_timer(order.id, self.config.unpaid_ttl);
                tracing::info!(
                    order_id = %order.id,
                    train = %order.train_num,
                    seat_class = %order.seat_class,
                    car = order.car_num,
                    seat = order.seat_num.as_deref().unwrap_or("standing"),
                    price = order.price.cents(),
                    "order booked"
                );
                Ok(order)
            }
            Err(error) => {
                Self::release_slot(&schedule, &reserved, req.dep_idx, req.arr_idx);
                Err(error)
            }
        }
    }

    // ========================================================================
    // CancelOrder
    // ========================================================================

    /// Cancels an order that is awaiting payment and releases its
    /// reservation. Counts toward the user's daily cancellation cap.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] when the order is past the
    /// unpaid stage (a concurrent timeout counts as "past").
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.require(order_id).await?;
        let cancelled = match order.status {
            OrderStatus::Unpaid => {
                self.store
                    .transition(order_id, &[OrderStatus::Unpaid], OrderStatus::Cancelled)
                    .await?
            }
            OrderStatus::ChangeUnpaid => {
                self.store
                    .transition(
                        order_id,
                        &[OrderStatus::ChangeUnpaid],
                        OrderStatus::ChangeCancelled,
                    )
                    .await?
            }
            status => {
                return Err(BookingError::InvalidTransition {
                    status,
                    operation: "cancel",
                })
            }
        };
        let Some(cancelled) = cancelled else {
            // Lost the race to the timeout handler.
            return Err(self.stale_transition(order_id, "cancel").await);
        };

        self.release_order(&cancelled);
        self.store
            .record_cancellation(cancelled.user_id, self.clock.now().date_naive())
            .await?;
        tracing::info!(order_id = %order_id, "order cancelled");
        Ok(cancelled)
    }

    // ========================================================================
    // Payment
    // ========================================================================

    /// Pays an unpaid order (or the outstanding delta of a rebooking).
    ///
    /// The charge settles before the status flips; if the order timed out
    /// in between, the charge is refunded and the payment is rejected.
    /// Fully paying a rebooking also moves its source order to `Changed`.
    ///
    /// # Errors
    ///
    /// Status-specific [`BookingError::OrderNotPayable`] rejections,
    /// [`BookingError::PriceMismatch`], or
    /// [`BookingError::PaymentFailed`].
    pub async fn pay(
        &self,
        order_id: OrderId,
        pay_type: u32,
        pay_account: &str,
        amount: crate::types::Money,
    ) -> Result<Order> {
        let order = self.require(order_id).await?;
        let (pending, target) = match order.status {
            OrderStatus::Unpaid => (OrderStatus::Unpaid, OrderStatus::Paid),
            OrderStatus::ChangeUnpaid => (OrderStatus::ChangeUnpaid, OrderStatus::ChangePaid),
            status => return Err(Self::not_payable(status)),
        };
        if amount != order.price {
            return Err(BookingError::PriceMismatch {
                expected: order.price,
                offered: amount,
            });
        }

        self.gateway
            .charge(order.id, order.user_id, pay_type, pay_account, order.price)
            .await
            .map_err(|e| BookingError::PaymentFailed {
                reason: e.to_string(),
            })?;

        let paid = self
            .store
            .mark_paid(
                order_id,
                pending,
                target,
                pay_type,
                pay_account,
                self.clock.now(),
            )
            .await?;
        let Some(paid) = paid else {
            // Timed out while the charge settled; give the money back.
            if let Err(error) = self
                .gateway
                .refund(order.id, order.user_id, pay_type, pay_account, order.price)
                .await
            {
                tracing::error!(order_id = %order_id, %error, "refund of a late payment failed");
            }
            return Err(BookingError::OrderNotPayable {
                reason: NotPayableReason::TimedOut,
            });
        };

        // Fully paying a rebooking settles the chain: the replaced order
        // moves to Changed and stops holding its seats.
        if target == OrderStatus::ChangePaid {
            if let Some(source_id) = paid.source_order_id {
                if let Some(changed) = self
                    .store
                    .transition(source_id, &[OrderStatus::Paid], OrderStatus::Changed)
                    .await?
                {
                    self.release_order(&changed);
                }
            }
        }

        tracing::info!(
            order_id = %order_id,
            amount = amount.cents(),
            status = %paid.status,
            "order paid"
        );
        Ok(paid)
    }

    // ========================================================================
    // Refund
    // ========================================================================

    /// Refunds a paid order, releasing its reservation. Counts toward the
    /// user's daily cancellation cap.
    ///
    /// Issued tickets are refundable only while
    /// [`CoreConfig::allow_refund_after_issue`] is set.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] for non-refundable statuses,
    /// [`BookingError::RefundFailed`] when the gateway rejects the refund
    /// (the order stays `Refunded`; reconciliation is an operations task).
    pub async fn refund(&self, order_id: OrderId) -> Result<Order> {
        let order = self.require(order_id).await?;
        let mut allowed = vec![OrderStatus::Paid, OrderStatus::ChangePaid];
        if self.config.allow_refund_after_issue {
            allowed.push(OrderStatus::Issued);
        }
        if !allowed.contains(&order.status) {
            return Err(BookingError::InvalidTransition {
                status: order.status,
                operation: "refund",
            });
        }

        let Some(refunded) = self
            .store
            .transition(order_id, &allowed, OrderStatus::Refunded)
            .await?
        else {
            return Err(self.stale_transition(order_id, "refund").await);
        };

        self.release_order(&refunded);
        self.gateway
            .refund(
                refunded.id,
                refunded.user_id,
                refunded.pay_type.unwrap_or(0),
                refunded.pay_account.as_deref().unwrap_or(""),
                refunded.price,
            )
            .await
            .map_err(|e| BookingError::RefundFailed {
                reason: e.to_string(),
            })?;
        self.store
            .record_cancellation(refunded.user_id, self.clock.now().date_naive())
            .await?;

        tracing::info!(
            order_id = %order_id,
            amount = refunded.price.cents(),
            "order refunded"
        );
        Ok(refunded)
    }

    // ========================================================================
    // Change (rebooking)
    // ========================================================================

    /// Rebooks a paid order onto a new journey. One rebooking per chain.
    ///
    /// The new reservation runs the same pipeline as a fresh booking,
    /// except the passenger-overlap check ignores the order being
    /// replaced. Pricing settles by difference: a cheaper journey refunds
    /// the difference at once and the new order is `ChangePaid`; a dearer
    /// one leaves the new order `ChangeUnpaid` carrying only the delta,
    /// with the usual unpaid deadline, while the source stays `Paid` until
    /// the delta settles.
    ///
    /// # Errors
    ///
    /// [`BookingError::AlreadyChanged`] when the chain rule is violated,
    /// plus the booking pipeline's errors.
    pub async fn change(self: &Arc<Self>, source_order_id: OrderId, req: BookingRequest) -> Result<Order> {
        let source = self.require(source_order_id).await?;
        if source.change_order_id.is_some() || source.source_order_id.is_some() {
            return Err(BookingError::AlreadyChanged);
        }
        if source.status != OrderStatus::Paid {
            return Err(BookingError::InvalidTransition {
                status: source.status,
                operation: "rebook",
            });
        }
        if self.store.unpaid_count(req.user_id).await? > 0 {
            return Err(BookingError::UnpaidOrderExists);
        }

        let train = self.lookup_train(&req)?;
        let (dep_time, arr_time) =
            train.dep_arr_times(req.departure_date, req.dep_idx, req.arr_idx);
        if self
            .store
            .has_time_conflict(req.passenger_id, dep_time, arr_time, Some(source.id))
            .await?
        {
            return Err(BookingError::PassengerTimeConflict);
        }
        Self::check_seat_class(&train, req.seat_class)?;

        let schedule = self.schedules.instance(&train, req.departure_date);
        let reserved = self.reserve(&schedule, &req)?;

        match self
            .finalize_change(&train, &req, &reserved, &source)
            .await
        {
            Ok(order) => Ok(order),
            Err(error) => {
                Self::release_slot(&schedule, &reserved, req.dep_idx, req.arr_idx);
                Err(error)
            }
        }
    }

    async fn finalize_change(
        self: &Arc<Self>,
        train: &Arc<TrainInfo>,
        req: &BookingRequest,
        reserved: &ReservedSlot,
        source: &Order,
    ) -> Result<Order> {
        let full_price = train.order_price(
            reserved.car_class,
            reserved.seat.as_ref().map(|(_, num)| num.as_str()),
            req.dep_idx,
            req.arr_idx,
        )?;

        if source.price >= full_price {
            // The new journey costs no more: settle now, refund the rest.
            let mut order = self
                .finalize_order(train, req, reserved, Some(source))
                .await?;
            let refreshed = self
                .store
                .mark_paid(
                    order.id,
                    OrderStatus::Unpaid,
                    OrderStatus::ChangePaid,
                    source.pay_type.unwrap_or(0),
                    source.pay_account.as_deref().unwrap_or(""),
                    self.clock.now(),
                )
                .await?;
            if let Some(refreshed) = refreshed {
                order = refreshed;
            }
            match self
                .store
                .transition(source.id, &[OrderStatus::Paid], OrderStatus::Changed)
                .await?
            {
                Some(changed) => self.release_order(&changed),
                None => tracing::warn!(
                    order_id = %source.id,
                    "rebooking source left Paid concurrently; link kept for reconciliation"
                ),
            }

            let difference = source.price.saturating_sub(full_price);
            if !difference.is_zero() {
                if let Err(error) = self
                    .gateway
                    .refund(
                        source.id,
                        source.user_id,
                        source.pay_type.unwrap_or(0),
                        source.pay_account.as_deref().unwrap_or(""),
                        difference,
                    )
                    .await
                {
                    // The rebooking is committed; the refund retries out of
                    // band.
                    tracing::error!(
                        order_id = %source.id,
                        amount = difference.cents(),
                        %error,
                        "rebooking difference refund failed"
                    );
                }
            }
            tracing::info!(
                order_id = %order.id,
                source_order_id = %source.id,
                refunded = difference.cents(),
                "rebooked with refund"
            );
            Ok(order)
        } else {
            // Dearer journey: the new order carries only the delta and must
            // be paid like any unpaid order.
            let delta = full_price.saturating_sub(source.price);
            let order = self
                .finalize_change_unpaid(train, req, reserved, source, delta)
                .await?;
            self.spawn_unpaid_timer(order.id, self.config.unpaid_ttl);
            tracing::info!(
                order_id = %order.id,
                source_order_id = %source.id,
                delta = delta.cents(),
                "rebooked awaiting delta"
            );
            Ok(order)
        }
    }

    // ========================================================================
    // CheckIn
    // ========================================================================

    /// Issues the ticket for a paid order.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] unless the order is `Paid` or
    /// `ChangePaid`.
    pub async fn check_in(&self, order_id: OrderId) -> Result<(Order, TicketId)> {
        let issued = self
            .store
            .transition(
                order_id,
                &[OrderStatus::Paid, OrderStatus::ChangePaid],
                OrderStatus::Issued,
            )
            .await?;
        let Some(issued) = issued else {
            return Err(self.stale_transition(order_id, "check in").await);
        };
        let ticket_id = self.ids.ticket_id(issued.passenger_id).await?;
        tracing::info!(order_id = %order_id, ticket_id = %ticket_id, "ticket issued");
        Ok((issued, ticket_id))
    }

    // ========================================================================
    // Timers & sweepers
    // ========================================================================

    /// Times out an order still awaiting payment and releases its
    /// reservation.
    ///
    /// Idempotent: a no-op unless the order currently sits in `Unpaid` or
    /// `ChangeUnpaid`, so firing it late, twice, or concurrently with a
    /// cancellation is harmless.
    ///
    /// # Errors
    ///
    /// Propagates store failures only.
    pub async fn expire_unpaid(&self, order_id: OrderId) -> Result<()> {
        let timed_out = match self
            .store
            .transition(order_id, &[OrderStatus::Unpaid], OrderStatus::UnpaidTimeout)
            .await?
        {
            Some(order) => order,
            None => match self
                .store
                .transition(
                    order_id,
                    &[OrderStatus::ChangeUnpaid],
                    OrderStatus::ChangeUnpaidTimeout,
                )
                .await?
            {
                Some(order) => order,
                None => return Ok(()),
            },
        };
        self.release_order(&timed_out);
        tracing::info!(order_id = %order_id, "unpaid order timed out");
        Ok(())
    }

    /// Moves concluded journeys (`arr_time` in the past) from
    /// `Paid`/`ChangePaid`/`Issued` to `Expired` and retires schedule
    /// instances with no journeys left. Seats are not released — the
    /// journey happened.
    ///
    /// # Errors
    ///
    /// Propagates store failures only.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let candidates = self
            .store
            .list_by_status(&[
                OrderStatus::Paid,
                OrderStatus::ChangePaid,
                OrderStatus::Issued,
            ])
            .await?;
        let mut expired = 0;
        for order in candidates {
            if order.arr_time < now
                && self
                    .store
                    .transition(order.id, &[order.status], OrderStatus::Expired)
                    .await?
                    .is_some()
            {
                expired += 1;
            }
        }
        let retired = self.schedules.retire_concluded(now);
        if expired > 0 || retired > 0 {
            tracing::debug!(expired, retired, "expiry sweep");
        }
        Ok(expired)
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) on the configured
    /// interval until the handle is aborted.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.expiry_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = engine.sweep_expired().await {
                    tracing::error!(%error, "expiry sweep failed");
                }
            }
        })
    }

    /// Rebuilds in-memory seat state from the store's live orders after a
    /// restart, and re-arms timeout timers for orders still awaiting
    /// payment. Returns how many reservations were restored.
    ///
    /// # Errors
    ///
    /// Propagates store failures only; unrestorable orders are logged and
    /// skipped.
    pub async fn rehydrate(self: &Arc<Self>) -> Result<usize> {
        let active = self.store.list_by_status(&ACTIVE_STATUSES).await?;
        let now = self.clock.now();
        let mut restored = 0;
        for order in active {
            let Some(train) = self
                .catalog
                .train_info(&order.train_num, order.departure_date)
            else {
                tracing::warn!(order_id = %order.id, "active order references an unknown run");
                continue;
            };
            let schedule = self.schedules.instance(&train, order.departure_date);
            let Some(car) = schedule.car(order.car_num) else {
                tracing::warn!(order_id = %order.id, car = order.car_num, "active order references an unknown car");
                continue;
            };
            let ok = match &order.seat_num {
                Some(seat_num) => car.restore_seat(seat_num, order.dep_idx, order.arr_idx),
                None => car.restore_standing(order.dep_idx, order.arr_idx),
            };
            if !ok {
                tracing::warn!(order_id = %order.id, "reservation could not be restored");
                continue;
            }
            restored += 1;

            if matches!(
                order.status,
                OrderStatus::Unpaid | OrderStatus::ChangeUnpaid
            ) {
                let deadline = order.book_time
                    + chrono::Duration::from_std(self.config.unpaid_ttl)
                        .unwrap_or_else(|_| chrono::Duration::minutes(30));
                let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
                self.spawn_unpaid_timer(order.id, remaining);
            }
        }
        tracing::info!(restored, "seat state rehydrated");
        Ok(restored)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lookup_train(&self, req: &BookingRequest) -> Result<Arc<TrainInfo>> {
        let not_found = || BookingError::TrainNotFound {
            train_num: req.train_num.as_str().to_string(),
            date: req.departure_date,
        };
        let train = self
            .catalog
            .train_info(&req.train_num, req.departure_date)
            .ok_or_else(not_found)?;
        if req.dep_idx >= req.arr_idx || usize::from(req.arr_idx) >= train.timetable.len() {
            return Err(not_found());
        }
        Ok(train)
    }

    /// A standing-only request is valid on any train; every other class
    /// must actually exist in the formation.
    fn check_seat_class(train: &TrainInfo, seat_class: SeatClass) -> Result<()> {
        if seat_class != SeatClass::NoSeat && !train.class_car_positions.contains_key(&seat_class)
        {
            return Err(BookingError::SeatClassInvalid { seat_class });
        }
        Ok(())
    }

    fn reserve(&self, schedule: &ScheduleInstance, req: &BookingRequest) -> Result<ReservedSlot> {
        // An explicit standing request draws on any car's quota and never
        // takes a seat.
        if req.seat_class == SeatClass::NoSeat {
            for car in schedule.cars() {
                if car.try_reserve_standing(req.dep_idx, req.arr_idx) {
                    return Ok(ReservedSlot {
                        car_num: car.car_num,
                        car_class: SeatClass::NoSeat,
                        seat: None,
                    });
                }
            }
            return Err(BookingError::NoTicketsAvailable);
        }

        // Every car of the class gets a shot at a real seat before any
        // standing slot is considered.
        for car in schedule.cars_of_class(req.seat_class) {
            if let Some(seat_idx) = car.try_reserve_seat(req.dep_idx, req.arr_idx, req.is_student)
            {
                return Ok(ReservedSlot {
                    car_num: car.car_num,
                    car_class: car.seat_class,
                    seat: Some((seat_idx, car.seats[seat_idx].seat_num.clone())),
                });
            }
        }
        for car in schedule.cars_of_class(req.seat_class) {
            if car.try_reserve_standing(req.dep_idx, req.arr_idx) {
                return Ok(ReservedSlot {
                    car_num: car.car_num,
                    car_class: car.seat_class,
                    seat: None,
                });
            }
        }
        Err(BookingError::NoTicketsAvailable)
    }

    fn release_slot(schedule: &ScheduleInstance, slot: &ReservedSlot, dep_idx: u8, arr_idx: u8) {
        if let Some(car) = schedule.car(slot.car_num) {
            match &slot.seat {
                Some((seat_idx, _)) => car.release_seat(*seat_idx, dep_idx, arr_idx),
                None => car.release_standing(dep_idx, arr_idx),
            }
        }
    }

    fn release_order(&self, order: &Order) {
        let Some(schedule) = self
            .schedules
            .get(&order.train_num, order.departure_date)
        else {
            tracing::warn!(order_id = %order.id, "no live schedule instance to release into");
            return;
        };
        let Some(car) = schedule.car(order.car_num) else {
            tracing::warn!(order_id = %order.id, car = order.car_num, "released order references an unknown car");
            return;
        };
        match &order.seat_num {
            Some(seat_num) => {
                if let Some(seat_idx) = car.seat_index(seat_num) {
                    car.release_seat(seat_idx, order.dep_idx, order.arr_idx);
                }
            }
            None => car.release_standing(order.dep_idx, order.arr_idx),
        }
    }

    /// Builds and persists the order record for a fresh reservation. The
    /// caller releases the slot if this fails.
    async fn finalize_order(
        &self,
        train: &Arc<TrainInfo>,
        req: &BookingRequest,
        reserved: &ReservedSlot,
        source: Option<&Order>,
    ) -> Result<Order> {
        let price = train.order_price(
            reserved.car_class,
            reserved.seat.as_ref().map(|(_, num)| num.as_str()),
            req.dep_idx,
            req.arr_idx,
        )?;
        let order = self
            .build_order(train, req, reserved, price, source)
            .await?;
        self.store.insert(order.clone()).await?;
        if let Some(source) = source {
            self.store.link_change(source.id, order.id).await?;
        }
        Ok(order)
    }

    /// Builds and persists a delta-priced rebooking awaiting payment.
    async fn finalize_change_unpaid(
        &self,
        train: &Arc<TrainInfo>,
        req: &BookingRequest,
        reserved: &ReservedSlot,
        source: &Order,
        delta: crate::types::Money,
    ) -> Result<Order> {
        let mut order = self
            .build_order(train, req, reserved, delta, Some(source))
            .await?;
        order.status = OrderStatus::ChangeUnpaid;
        self.store.insert(order.clone()).await?;
        self.store.link_change(source.id, order.id).await?;
        Ok(order)
    }

    async fn build_order(
        &self,
        train: &Arc<TrainInfo>,
        req: &BookingRequest,
        reserved: &ReservedSlot,
        price: crate::types::Money,
        source: Option<&Order>,
    ) -> Result<Order> {
        let now = self.clock.now();
        let (dep_time, arr_time) =
            train.dep_arr_times(req.departure_date, req.dep_idx, req.arr_idx);
        let dep_row = &train.timetable[usize::from(req.dep_idx)];
        let arr_row = &train.timetable[usize::from(req.arr_idx)];
        let id = self.ids.order_id(req.user_id).await?;
        // A standing fallback is sold as a standing ticket no matter which
        // car's quota absorbed it.
        let seat_class = if reserved.seat.is_some() {
            reserved.car_class
        } else {
            SeatClass::NoSeat
        };
        Ok(Order {
            id,
            order_num: format!("{}-{}", req.departure_date.format("%Y%m%d"), id),
            user_id: req.user_id,
            passenger_id: req.passenger_id,
            train_num: req.train_num.clone(),
            departure_date: req.departure_date,
            car_num: reserved.car_num,
            seat_num: reserved.seat.as_ref().map(|(_, num)| num.clone()),
            seat_class,
            check_gate: dep_row.check_gate.clone(),
            dep_station: dep_row.station_name.clone(),
            arr_station: arr_row.station_name.clone(),
            dep_idx: req.dep_idx,
            arr_idx: req.arr_idx,
            dep_time,
            arr_time,
            price,
            book_time: now,
            pay_time: None,
            pay_type: None,
            pay_account: None,
            status: OrderStatus::Unpaid,
            change_order_id: None,
            source_order_id: source.map(|s| s.id),
        })
    }

    fn spawn_unpaid_timer(self: &Arc<Self>, order_id: OrderId, delay: Duration) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = engine.expire_unpaid(order_id).await {
                tracing::error!(order_id = %order_id, %error, "unpaid timeout handling failed");
            }
        });
    }

    async fn require(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound { order_id })
    }

    /// The accurate error after a lost compare-and-set: re-reads the status
    /// that beat us.
    async fn stale_transition(&self, order_id: OrderId, operation: &'static str) -> BookingError {
        match self.store.get(order_id).await {
            Ok(Some(order)) => BookingError::InvalidTransition {
                status: order.status,
                operation,
            },
            Ok(None) => BookingError::OrderNotFound { order_id },
            Err(e) => BookingError::Store(e),
        }
    }

    const fn not_payable(status: OrderStatus) -> BookingError {
        let reason = match status {
            OrderStatus::Paid | OrderStatus::ChangePaid => NotPayableReason::AlreadyPaid,
            OrderStatus::UnpaidTimeout | OrderStatus::ChangeUnpaidTimeout => {
                NotPayableReason::TimedOut
            }
            OrderStatus::Changed => NotPayableReason::Changed,
            OrderStatus::Issued => NotPayableReason::Issued,
            OrderStatus::Refunded => NotPayableReason::Refunded,
            OrderStatus::Expired => NotPayableReason::Expired,
            _ => NotPayableReason::Cancelled,
        };
        BookingError::OrderNotPayable { reason }
    }
}
