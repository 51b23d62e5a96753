//! Railbook - the seat reservation core of a railway booking system
//!
//! Answers one question atomically: given a train, a travel date, a
//! departure and arrival station, a seat class, and a passenger, can a seat
//! (or standing slot) be reserved without conflicting with any existing
//! reservation on the overlapping route segments? And then keeps the
//! resulting order honest through payment, timeout, cancellation, refund,
//! rebooking, and issuance.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   loads    ┌─────────────────┐   materializes   ┌──────────────────┐
//! │  Catalog   │◄───────────│  CatalogSource  │                  │ ScheduleInstance │
//! │ (immutable)│            │  (collaborator) │        ┌────────►│  per (train,date)│
//! └─────┬──────┘            └─────────────────┘        │         │  CarInventory ×N │
//!       │                                              │         └──────────────────┘
//!       │ match_query                     ScheduleRegistry                 ▲
//!       ▼                                              ▲                   │ car-level
//! ┌────────────┐                                       │                   │ mutex
//! │QueryService│───────────── availability ────────────┘                   │
//! └────────────┘                                                           │
//! ┌────────────┐  submit / pay / cancel / refund / change / check-in       │
//! │ OrderEngine│──────────────────────────────────────────────────────────┘
//! └─────┬──────┘
//!       │ OrderStore · PaymentGateway · SequenceStore (collaborators)
//! ```
//!
//! # The core data structure
//!
//! A timetable of N stations defines N−1 segments. Each seat carries a
//! [`SegmentMask`] with one bit per segment; a seat can be resold on the
//! same run whenever the requested range does not intersect the mask.
//! Standing capacity is a per-car counter per segment. All of it lives
//! behind one mutex per car — a reservation touches exactly one car, so
//! there is no train-wide lock on the hot path.
//!
//! # Lifecycle rules
//!
//! - An unpaid order is timed out at `book_time + unpaid_ttl` by a spawned
//!   task. The task never needs cancelling: it transitions the order by
//!   compare-and-set and is a no-op once anything else moved it first.
//! - Cancellation, refund, and rebooking release exactly the segments the
//!   order held.
//! - A paid order may be rebooked once; the fare difference is refunded at
//!   once or collected as a delta under the same timeout discipline.
//!
//! [`SegmentMask`]: segment::SegmentMask

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod idgen;
pub mod inventory;
pub mod payment;
pub mod query;
pub mod schedule;
pub mod segment;
pub mod store;
pub mod types;

pub use catalog::{Catalog, CatalogSource, InMemoryCatalogSource, TrainInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use engine::{BookingRequest, OrderEngine};
pub use error::{BookingError, NotPayableReason, Result, StoreError};
pub use idgen::{IdPool, IdService};
pub use inventory::{CarAvailability, CarInventory, SeatMeta};
pub use payment::{MockPaymentGateway, PaymentGateway, PaymentReceipt, ScriptedGateway};
pub use query::{ClassAvailability, JourneyOption, QueryService};
pub use schedule::{ScheduleInstance, ScheduleRegistry};
pub use segment::SegmentMask;
pub use store::{
    InMemoryOrderStore, InMemorySequenceStore, OrderStore, SequenceStore,
};
pub use types::{
    Money, Order, OrderId, OrderStatus, PassengerId, SeatClass, Station, TicketId, TrainNumber,
    UserId,
};
