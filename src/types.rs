//! Domain types for the seat reservation core.
//!
//! Value objects (ids, money, seat classes), the order entity, and its
//! status state machine. Identifiers are pooled integers allocated by the
//! id service rather than random UUIDs, because downstream systems shard on
//! the low digits (see [`crate::idgen`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(u64);

impl OrderId {
    /// Creates an `OrderId` from a raw pooled id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user account (the purchaser)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Creates a `UserId` from a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a passenger (the traveller named on the ticket)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassengerId(u64);

impl PassengerId {
    /// Creates a `PassengerId` from a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PassengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an issued ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(u64);

impl TicketId {
    /// Creates a `TicketId` from a raw pooled id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A train number such as `G1` or `C100`.
///
/// The leading letter carries routing semantics: numbers beginning with `C`
/// are intercity services, which are matched by exact station code rather
/// than by city (a single city may host several of their stops).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainNumber(String);

impl TrainNumber {
    /// Creates a `TrainNumber`
    #[must_use]
    pub const fn new(num: String) -> Self {
        Self(num)
    }

    /// Returns the train number as a string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an intercity service (train number starts with `C`)
    #[must_use]
    pub fn is_intercity(&self) -> bool {
        self.0.starts_with('C')
    }
}

impl From<&str> for TrainNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TrainNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (smallest currency unit, to avoid floating point)
// ============================================================================

/// A fare amount in the smallest currency unit (cents / 分).
///
/// All price arithmetic in the core is integral; division by 100 happens
/// only at the display edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from the smallest currency unit
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in the smallest currency unit
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtracts `other`, returning `None` if the result would be negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Difference `self - other`, saturating at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|m| m.0).sum())
    }
}

// ============================================================================
// Seat classes
// ============================================================================

/// Seat class of a car or an order.
///
/// The wire codes are bit-exact with persisted data and the fare tables;
/// never re-spell them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeatClass {
    /// Business class — `S`
    #[serde(rename = "S")]
    Business,
    /// First class — `FC`
    #[serde(rename = "FC")]
    FirstClass,
    /// Second class — `SC`
    #[serde(rename = "SC")]
    SecondClass,
    /// Advanced soft sleeper — `ASS`
    #[serde(rename = "ASS")]
    AdvancedSoftSleeper,
    /// Soft sleeper — `SS`
    #[serde(rename = "SS")]
    SoftSleeper,
    /// EMU sleeper — `DS`
    #[serde(rename = "DS")]
    EmuSleeper,
    /// Mobile sleeper (lower berths sold as seats on conventional rail) — `MS`
    #[serde(rename = "MS")]
    MobileSleeper,
    /// Hard sleeper — `HS`
    #[serde(rename = "HS")]
    HardSleeper,
    /// Soft seat — `SST`
    #[serde(rename = "SST")]
    SoftSeat,
    /// Hard seat — `HST`
    #[serde(rename = "HST")]
    HardSeat,
    /// Standing ticket — `NST`
    #[serde(rename = "NST")]
    NoSeat,
}

impl SeatClass {
    /// The persisted wire code for this class
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Business => "S",
            Self::FirstClass => "FC",
            Self::SecondClass => "SC",
            Self::AdvancedSoftSleeper => "ASS",
            Self::SoftSleeper => "SS",
            Self::EmuSleeper => "DS",
            Self::MobileSleeper => "MS",
            Self::HardSleeper => "HS",
            Self::SoftSeat => "SST",
            Self::HardSeat => "HST",
            Self::NoSeat => "NST",
        }
    }

    /// Parses a wire code back into a class
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::Business),
            "FC" => Some(Self::FirstClass),
            "SC" => Some(Self::SecondClass),
            "ASS" => Some(Self::AdvancedSoftSleeper),
            "SS" => Some(Self::SoftSleeper),
            "DS" => Some(Self::EmuSleeper),
            "MS" => Some(Self::MobileSleeper),
            "HS" => Some(Self::HardSleeper),
            "SST" => Some(Self::SoftSeat),
            "HST" => Some(Self::HardSeat),
            "NST" => Some(Self::NoSeat),
            _ => None,
        }
    }

    /// Whether fares for this class are keyed per berth tier.
    ///
    /// Sleeper berths price differently by tier; their fare-table keys are
    /// `<code>-<tier>` (see [`berth_price_key`]).
    #[must_use]
    pub const fn uses_berth_pricing(&self) -> bool {
        matches!(
            self,
            Self::AdvancedSoftSleeper | Self::SoftSleeper | Self::HardSleeper
        )
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Extracts the berth tier from a sleeper seat number.
///
/// Sleeper seat numbers have the form `<car>-<tier>[<position>]`, e.g.
/// `03-U2` is upper berth 2. The tier is the non-digit run after the dash.
/// Returns `None` for seat numbers without a tier component.
#[must_use]
pub fn berth_tier(seat_num: &str) -> Option<&str> {
    let (_, rest) = seat_num.split_once('-')?;
    let tier_end = rest
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(rest.len());
    if tier_end == 0 {
        return None;
    }
    Some(&rest[..tier_end])
}

/// Builds the fare-table key for a seat.
///
/// Sleeper classes are keyed `<code>-<tier>`; everything else is keyed by
/// the bare class code.
#[must_use]
pub fn berth_price_key(seat_class: SeatClass, seat_num: Option<&str>) -> String {
    if seat_class.uses_berth_pricing() {
        if let Some(tier) = seat_num.and_then(berth_tier) {
            return format!("{}-{}", seat_class.code(), tier);
        }
    }
    seat_class.code().to_string()
}

// ============================================================================
// Stations
// ============================================================================

/// An immutable station record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Station code, unique nationwide
    pub station_code: String,
    /// Code of the city the station belongs to
    pub city_code: String,
    /// Display name
    pub station_name: String,
}

impl Station {
    /// Creates a `Station`
    #[must_use]
    pub const fn new(station_code: String, city_code: String, station_name: String) -> Self {
        Self {
            station_code,
            city_code,
            station_name,
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order lifecycle status.
///
/// The `Change*` variants mirror the plain variants for the replacement
/// order created by a rebooking; the original order moves to [`Changed`]
/// once the replacement is fully paid.
///
/// [`Changed`]: OrderStatus::Changed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Booked, awaiting payment
    Unpaid,
    /// Payment deadline passed; reservation released
    UnpaidTimeout,
    /// Cancelled by the user before payment
    Cancelled,
    /// Paid
    Paid,
    /// Refunded after payment
    Refunded,
    /// Replaced by a rebooking
    Changed,
    /// Rebooked order awaiting the fare delta
    ChangeUnpaid,
    /// Fare-delta deadline passed; new reservation released
    ChangeUnpaidTimeout,
    /// Rebooked order cancelled before the delta was paid
    ChangeCancelled,
    /// Rebooked order fully paid
    ChangePaid,
    /// Ticket issued at the gate
    Issued,
    /// Journey concluded
    Expired,
}

impl OrderStatus {
    /// Statuses that hold a live seat (or standing) reservation.
    ///
    /// These are exactly the statuses that participate in the
    /// passenger-overlap constraint and whose seat-mask bits must be set.
    #[must_use]
    pub const fn holds_reservation(&self) -> bool {
        matches!(
            self,
            Self::Unpaid | Self::Paid | Self::ChangeUnpaid | Self::ChangePaid | Self::Issued
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// All statuses holding a live reservation, for store queries
pub const ACTIVE_STATUSES: [OrderStatus; 5] = [
    OrderStatus::Unpaid,
    OrderStatus::Paid,
    OrderStatus::ChangeUnpaid,
    OrderStatus::ChangePaid,
    OrderStatus::Issued,
];

/// A booking for one passenger on one train run.
///
/// `seat_num` is `None` for standing tickets; such orders always carry
/// [`SeatClass::NoSeat`] regardless of the class of the car whose standing
/// quota absorbed them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Pooled order id (low nibble encodes `user_id % 10`)
    pub id: OrderId,
    /// Human-facing order number
    pub order_num: String,
    /// Purchasing user
    pub user_id: UserId,
    /// Travelling passenger
    pub passenger_id: PassengerId,
    /// Train number
    pub train_num: TrainNumber,
    /// Departure date of the train's origin station
    pub departure_date: NaiveDate,
    /// Car number (1-based position in the formation)
    pub car_num: u8,
    /// Seat number within the car; `None` for standing tickets
    pub seat_num: Option<String>,
    /// Seat class as sold
    pub seat_class: SeatClass,
    /// Check-in gate at the departure station
    pub check_gate: Option<String>,
    /// Departure station name
    pub dep_station: String,
    /// Arrival station name
    pub arr_station: String,
    /// Departure station index in the timetable
    pub dep_idx: u8,
    /// Arrival station index in the timetable
    pub arr_idx: u8,
    /// Wall-clock departure
    pub dep_time: DateTime<Utc>,
    /// Wall-clock arrival
    pub arr_time: DateTime<Utc>,
    /// Fare; for an unpaid rebooking this is the outstanding delta
    pub price: Money,
    /// When the order was booked
    pub book_time: DateTime<Utc>,
    /// When the order was paid
    pub pay_time: Option<DateTime<Utc>>,
    /// Opaque downstream payment channel
    pub pay_type: Option<u32>,
    /// Account charged
    pub pay_account: Option<String>,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Id of the rebooking that replaced this order
    pub change_order_id: Option<OrderId>,
    /// Id of the order this rebooking replaced
    pub source_order_id: Option<OrderId>,
}

impl Order {
    /// Whether this order is a standing ticket
    #[must_use]
    pub const fn is_standing(&self) -> bool {
        self.seat_num.is_none()
    }

    /// Whether this order's travel window overlaps `[dep, arr]`.
    ///
    /// Boundaries are open: arriving at the exact minute another journey
    /// departs is not a conflict.
    #[must_use]
    pub fn overlaps(&self, dep: DateTime<Utc>, arr: DateTime<Utc>) -> bool {
        self.dep_time < arr && dep < self.arr_time
    }
}
