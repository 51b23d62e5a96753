//! Static train catalog: timetables, formations, and fare tables.
//!
//! The catalog is loaded once from a [`CatalogSource`] collaborator and is
//! immutable afterwards, so the hot path reads it lock-free. Per-train
//! metadata loads fan out over a bounded worker pool sized by
//! [`CoreConfig::catalog_load_parallelism`] — the bound exists because the
//! backing store caps its connections.
//!
//! Timetable times are minutes-of-day offsets from a synthetic day 0 (the
//! origin station's departure day). Normalization folds midnight crossings
//! into a day counter so that arrivals and departures are non-decreasing
//! along the route.

use crate::config::CoreConfig;
use crate::error::{BookingError, Result, StoreError};
use crate::inventory::SeatMeta;
use crate::types::{berth_price_key, Money, SeatClass, Station, TrainNumber};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// ============================================================================
// Wire formats
// ============================================================================

/// Time-of-day format `HH:MM`
pub const FMT_HM: &str = "%H:%M";
/// Time-of-day format `HH:MM:SS`
pub const FMT_HMS: &str = "%H:%M:%S";
/// Date format `YYYY-MM-DD`
pub const FMT_YMD: &str = "%Y-%m-%d";
/// Timestamp format `YYYY-MM-DD HH:MM`
pub const FMT_YMD_HM: &str = "%Y-%m-%d %H:%M";
/// Timestamp format `YYYY-MM-DD HH:MM:SS`
pub const FMT_YMD_HMS: &str = "%Y-%m-%d %H:%M:%S";
/// Placeholder for a missing departure/arrival time in timetables
pub const NULL_TIME: &str = "----";

/// Parses a timetable time-of-day cell.
///
/// Accepts `HH:MM` and `HH:MM:SS`; the `----` placeholder parses to `None`.
///
/// # Errors
///
/// Returns a [`StoreError`] for any other malformed cell.
pub fn parse_time_of_day(cell: &str) -> std::result::Result<Option<NaiveTime>, StoreError> {
    if cell == NULL_TIME {
        return Ok(None);
    }
    NaiveTime::parse_from_str(cell, FMT_HM)
        .or_else(|_| NaiveTime::parse_from_str(cell, FMT_HMS))
        .map(Some)
        .map_err(|_| StoreError(format!("malformed time-of-day cell: {cell}")))
}

// ============================================================================
// Journey time (minutes from the synthetic day-0 midnight)
// ============================================================================

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A point in a train's journey, counted in minutes from midnight of the
/// synthetic day the train departs its origin.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct JourneyTime(u32);

impl JourneyTime {
    /// From a raw time-of-day (day 0)
    #[must_use]
    pub fn from_time(t: NaiveTime) -> Self {
        use chrono::Timelike;
        Self(t.hour() * 60 + t.minute())
    }

    /// Total minutes from the synthetic day-0 midnight
    #[must_use]
    pub const fn minutes(&self) -> u32 {
        self.0
    }

    /// Days after the origin's departure day (0-based)
    #[must_use]
    pub const fn day(&self) -> u32 {
        self.0 / MINUTES_PER_DAY
    }

    /// Minute within its own day
    #[must_use]
    pub const fn minute_of_day(&self) -> u32 {
        self.0 % MINUTES_PER_DAY
    }

    /// This point shifted `days` later
    #[must_use]
    pub const fn add_days(&self, days: u32) -> Self {
        Self(self.0 + days * MINUTES_PER_DAY)
    }

    /// `HH:MM` rendering of the minute within the day
    #[must_use]
    pub fn hm(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.minute_of_day() / 60,
            self.minute_of_day() % 60
        )
    }

    /// Wall-clock instant on a concrete run departing its origin on
    /// `origin_date`.
    #[must_use]
    pub fn to_utc(&self, origin_date: NaiveDate) -> DateTime<Utc> {
        let midnight = origin_date.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&midnight) + Duration::minutes(i64::from(self.0))
    }
}

// ============================================================================
// Raw records from the catalog source
// ============================================================================

/// One train row as stored, before normalization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainRecord {
    /// Storage id, used to fetch the train's timetable and fares
    pub id: u64,
    /// Train number
    pub train_num: TrainNumber,
    /// Runs every K days (1 = daily)
    pub schedule_every_days: u32,
    /// Whether tickets are on sale
    pub is_selling: bool,
    /// Time of day sales open
    pub sale_start: Option<NaiveTime>,
    /// Why the train is not selling, when it is not
    pub not_selling_remark: Option<String>,
    /// First date the schedule is effective
    pub enable_start: NaiveDate,
    /// Last date the schedule is effective
    pub enable_end: NaiveDate,
    /// Formation as `carId:count;` tuples, e.g. `32:1;12:2;16:1`
    pub car_layout: String,
}

/// One timetable row as stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteRow {
    /// Position along the route, 0-based
    pub station_index: u8,
    /// Station code
    pub station_code: String,
    /// City code
    pub city_code: String,
    /// Station display name
    pub station_name: String,
    /// Check-in gate
    pub check_gate: Option<String>,
    /// Boarding platform
    pub platform: u8,
    /// Distance to the next station, km
    pub mileage_to_next: f32,
    /// Arrival time of day; `None` at the origin
    pub arr_time: Option<NaiveTime>,
    /// Departure time of day; `None` at the terminus
    pub dep_time: Option<NaiveTime>,
}

impl RouteRow {
    /// Convenience constructor for fixtures: times in the `HH:MM` /
    /// `HH:MM:SS` wire formats, `----` for none.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if a time cell is malformed.
    pub fn stop(
        station_index: u8,
        station_code: &str,
        city_code: &str,
        station_name: &str,
        arr: &str,
        dep: &str,
    ) -> std::result::Result<Self, StoreError> {
        Ok(Self {
            station_index,
            station_code: station_code.to_string(),
            city_code: city_code.to_string(),
            station_name: station_name.to_string(),
            check_gate: None,
            platform: 0,
            mileage_to_next: 0.0,
            arr_time: parse_time_of_day(arr)?,
            dep_time: parse_time_of_day(dep)?,
        })
    }
}

/// One fare row as stored: the price of one route segment for one fare key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePriceRow {
    /// Fare key: a seat-class code, with a `-<tier>` suffix for berths
    pub seat_key: String,
    /// Segment index, 0-based
    pub route_index: u8,
    /// Price of that segment
    pub price: Money,
}

/// A car design: class, seats, and standing quota
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarRecord {
    /// Storage id referenced from `car_layout`
    pub id: u32,
    /// Rolling-stock family (high-speed, through, …)
    pub train_type: String,
    /// Class of every seat in the car
    pub seat_class: SeatClass,
    /// Standing tickets the car absorbs per segment
    pub standing_capacity: u16,
    /// Seats in scan order
    pub seats: Vec<SeatMeta>,
}

/// Collaborator that supplies the immutable catalog data.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All stations
    async fn stations(&self) -> std::result::Result<Vec<Station>, StoreError>;
    /// All car designs
    async fn cars(&self) -> std::result::Result<Vec<CarRecord>, StoreError>;
    /// Train rows whose effective window intersects `[from, to]`
    async fn trains_in_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<Vec<TrainRecord>, StoreError>;
    /// Timetable rows of one train, ordered by station index
    async fn timetable(&self, train_id: u64) -> std::result::Result<Vec<RouteRow>, StoreError>;
    /// Fare rows of one train, ordered by fare key then route index
    async fn route_prices(
        &self,
        train_id: u64,
    ) -> std::result::Result<Vec<RoutePriceRow>, StoreError>;
}

// ============================================================================
// Normalized timetable
// ============================================================================

/// A normalized timetable row.
///
/// The origin's arrival equals its departure and the terminus's departure
/// equals its arrival; both are synthesized so interval arithmetic never
/// branches on missing endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Position along the route, 0-based
    pub station_index: u8,
    /// Station code
    pub station_code: String,
    /// City code
    pub city_code: String,
    /// Station display name
    pub station_name: String,
    /// Check-in gate
    pub check_gate: Option<String>,
    /// Boarding platform
    pub platform: u8,
    /// Distance to the next station, km
    pub mileage_to_next: f32,
    /// Arrival, minutes from day-0 midnight
    pub arr: JourneyTime,
    /// Departure, minutes from day-0 midnight
    pub dep: JourneyTime,
}

impl Route {
    /// `HH:MM` departure for timetable views
    #[must_use]
    pub fn dep_hm(&self) -> String {
        self.dep.hm()
    }

    /// `HH:MM` arrival for timetable views
    #[must_use]
    pub fn arr_hm(&self) -> String {
        self.arr.hm()
    }

    /// Dwell time at this station in minutes
    #[must_use]
    pub const fn stay_minutes(&self) -> u32 {
        self.dep.minutes() - self.arr.minutes()
    }
}

/// Folds midnight crossings into day offsets.
///
/// After this runs, `arr[i] >= dep[i-1]` and `dep[i] >= arr[i]` hold along
/// the whole route. Running it on an already-normalized timetable is a
/// no-op. No single segment may take 24h or more.
pub fn normalize_timetable(rows: &mut [Route]) {
    let n = rows.len();
    let mut day = 0u32;
    for i in 1..n {
        rows[i].arr = rows[i].arr.add_days(day);
        if rows[i].arr < rows[i - 1].dep {
            day += 1;
            rows[i].arr = rows[i].arr.add_days(1);
        }
        if i < n - 1 {
            rows[i].dep = rows[i].dep.add_days(day);
            if rows[i].dep < rows[i].arr {
                day += 1;
                rows[i].dep = rows[i].dep.add_days(1);
            }
        }
    }
    if n > 0 {
        // The terminus has no departure of its own.
        rows[n - 1].dep = rows[n - 1].arr;
    }
}

// ============================================================================
// Formations
// ============================================================================

/// One position in a train's expanded formation
#[derive(Clone, Debug)]
pub struct CarTemplate {
    /// Car-design id
    pub car_id: u32,
    /// Seat class of the car
    pub seat_class: SeatClass,
    /// Standing quota per segment
    pub standing_capacity: u16,
    /// Seats in scan order, shared across schedule instances
    pub seats: Arc<Vec<SeatMeta>>,
}

/// Parses a `carId:count;` formation string.
///
/// Malformed tuples are skipped; a repeated car id contributes additional
/// positions in its later place rather than replacing earlier ones.
#[must_use]
pub fn parse_car_layout(layout: &str) -> Vec<(u32, u32)> {
    layout
        .split(';')
        .filter_map(|tuple| {
            let (id, count) = tuple.split_once(':')?;
            Some((id.trim().parse().ok()?, count.trim().parse().ok()?))
        })
        .collect()
}

// ============================================================================
// TrainInfo
// ============================================================================

/// A query match: where to board and alight, and which run serves it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyMatch {
    /// Departure station index
    pub dep_idx: u8,
    /// Arrival station index
    pub arr_idx: u8,
    /// The origin-station departure date of the run that serves the query
    pub departure_date: NaiveDate,
}

/// An immutable train: normalized timetable, expanded formation, fares.
#[derive(Clone, Debug)]
pub struct TrainInfo {
    /// Train number
    pub train_num: TrainNumber,
    /// First date the schedule is effective
    pub enable_start: NaiveDate,
    /// Last date the schedule is effective
    pub enable_end: NaiveDate,
    /// Runs every K days (1 = daily)
    pub schedule_every_days: u32,
    /// Whether tickets are on sale
    pub is_selling: bool,
    /// Time of day sales open
    pub sale_start: Option<NaiveTime>,
    /// Why the train is not selling, when it is not
    pub not_selling_remark: Option<String>,
    /// Normalized timetable
    pub timetable: Vec<Route>,
    /// Fare table: key → per-segment prices
    pub fares: HashMap<String, Vec<Money>>,
    /// Day offset of the last station's departure (0 = same-day)
    pub route_dep_cross_days: u32,
    /// Expanded formation; position `i` is car number `i + 1`
    pub car_template: Vec<CarTemplate>,
    /// Formation positions per class, in appearance order. A class may sit
    /// in non-contiguous positions; never assume contiguity.
    pub class_car_positions: HashMap<SeatClass, Vec<u8>>,
}

impl TrainInfo {
    /// Builds a normalized `TrainInfo` from raw rows.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the timetable is shorter than two stops
    /// or the layout references an unknown car id.
    pub fn build(
        record: TrainRecord,
        timetable_rows: Vec<RouteRow>,
        price_rows: Vec<RoutePriceRow>,
        cars: &HashMap<u32, CarRecord>,
    ) -> std::result::Result<Self, StoreError> {
        if timetable_rows.len() < 2 {
            return Err(StoreError(format!(
                "train {} has a timetable of {} stops",
                record.train_num,
                timetable_rows.len()
            )));
        }

        let mut timetable: Vec<Route> = timetable_rows
            .into_iter()
            .map(|row| {
                let dep = row.dep_time.or(row.arr_time).unwrap_or(NaiveTime::MIN);
                let arr = row.arr_time.or(row.dep_time).unwrap_or(NaiveTime::MIN);
                Route {
                    station_index: row.station_index,
                    station_code: row.station_code,
                    city_code: row.city_code,
                    station_name: row.station_name,
                    check_gate: row.check_gate,
                    platform: row.platform,
                    mileage_to_next: row.mileage_to_next,
                    arr: JourneyTime::from_time(arr),
                    dep: JourneyTime::from_time(dep),
                }
            })
            .collect();
        normalize_timetable(&mut timetable);
        let route_dep_cross_days = timetable[timetable.len() - 1].dep.day();

        // Fare rows arrive ordered by (key, route index), so pushing keeps
        // each key's prices segment-ordered.
        let mut fares: HashMap<String, Vec<Money>> = HashMap::new();
        for row in price_rows {
            fares.entry(row.seat_key).or_default().push(row.price);
        }

        let mut car_template = Vec::new();
        let mut class_car_positions: HashMap<SeatClass, Vec<u8>> = HashMap::new();
        for (car_id, count) in parse_car_layout(&record.car_layout) {
            let design = cars.get(&car_id).ok_or_else(|| {
                StoreError(format!(
                    "train {} references unknown car {car_id}",
                    record.train_num
                ))
            })?;
            let seats = Arc::new(design.seats.clone());
            for _ in 0..count {
                let position = car_template.len() as u8;
                class_car_positions
                    .entry(design.seat_class)
                    .or_default()
                    .push(position);
                car_template.push(CarTemplate {
                    car_id,
                    seat_class: design.seat_class,
                    standing_capacity: design.standing_capacity,
                    seats: Arc::clone(&seats),
                });
            }
        }

        Ok(Self {
            train_num: record.train_num,
            enable_start: record.enable_start,
            enable_end: record.enable_end,
            schedule_every_days: record.schedule_every_days.max(1),
            is_selling: record.is_selling,
            sale_start: record.sale_start,
            not_selling_remark: record.not_selling_remark,
            timetable,
            fares,
            route_dep_cross_days,
            car_template,
            class_car_positions,
        })
    }

    /// Number of route segments (stations − 1)
    #[must_use]
    pub fn segment_count(&self) -> u8 {
        (self.timetable.len() - 1) as u8
    }

    /// Whether the origin departs on `date` (effective window + cadence)
    #[must_use]
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        if date < self.enable_start || date > self.enable_end {
            return false;
        }
        let k = i64::from(self.schedule_every_days);
        k <= 1 || (date - self.enable_start).num_days() % k == 0
    }

    /// Matches a station-pair query against this train.
    ///
    /// Regular trains match by city: the first station in the departure
    /// city is the candidate, refined to a later same-city station whose
    /// code equals the queried one; the arrival is found the same way
    /// further down the route. Intercity trains (`C…`) match by exact
    /// station code only. The returned departure date is the origin's —
    /// boarding at a station the train reaches on day 1 of its journey
    /// means the run departed the day before the query date.
    #[must_use]
    pub fn match_query(
        &self,
        dep_station: &Station,
        arr_station: &Station,
        query_date: NaiveDate,
    ) -> Option<JourneyMatch> {
        if query_date < self.enable_start
            || query_date > self.enable_end + Duration::days(i64::from(self.route_dep_cross_days))
        {
            return None;
        }

        let (dep_idx, arr_idx) = if self.train_num.is_intercity() {
            self.match_exact(dep_station, arr_station)?
        } else {
            self.match_by_city(dep_station, arr_station)?
        };
        if dep_idx >= arr_idx {
            return None;
        }

        // The run that serves this boarding departed its origin earlier by
        // the station's in-journey day offset.
        let departure_date = query_date
            - Duration::days(i64::from(self.timetable[dep_idx as usize].dep.day()));
        if !self.runs_on(departure_date) {
            return None;
        }

        Some(JourneyMatch {
            dep_idx,
            arr_idx,
            departure_date,
        })
    }

    fn match_by_city(&self, dep_station: &Station, arr_station: &Station) -> Option<(u8, u8)> {
        let n = self.timetable.len();
        let mut dep_idx: Option<usize> = None;
        let mut dep_refined = false;
        for (i, row) in self.timetable.iter().enumerate().take(n - 1) {
            if row.city_code == dep_station.city_code {
                if dep_idx.is_none() {
                    dep_idx = Some(i);
                }
                if !dep_refined && row.station_code == dep_station.station_code {
                    dep_idx = Some(i);
                    dep_refined = true;
                }
            } else if dep_idx.is_some() {
                break;
            }
        }
        let dep_idx = dep_idx?;

        let mut arr_idx: Option<usize> = None;
        let mut arr_refined = false;
        for (i, row) in self.timetable.iter().enumerate().skip(dep_idx + 1) {
            if row.city_code == arr_station.city_code {
                if arr_idx.is_none() {
                    arr_idx = Some(i);
                }
                if !arr_refined && row.station_code == arr_station.station_code {
                    arr_idx = Some(i);
                    break;
                }
            } else if arr_idx.is_some() {
                break;
            }
        }
        Some((dep_idx as u8, arr_idx? as u8))
    }

    fn match_exact(&self, dep_station: &Station, arr_station: &Station) -> Option<(u8, u8)> {
        let dep_idx = self
            .timetable
            .iter()
            .position(|row| row.station_code == dep_station.station_code)?;
        let arr_idx = self
            .timetable
            .iter()
            .skip(dep_idx + 1)
            .position(|row| row.station_code == arr_station.station_code)?
            + dep_idx
            + 1;
        Some((dep_idx as u8, arr_idx as u8))
    }

    /// Sums one fare key over `dep_idx..arr_idx`, clamping the end at the
    /// last priced segment.
    #[must_use]
    pub fn fare_between(&self, key: &str, dep_idx: u8, arr_idx: u8) -> Option<Money> {
        let prices = self.fares.get(key)?;
        let end = (arr_idx as usize).min(prices.len());
        Some(prices[(dep_idx as usize).min(end)..end].iter().copied().sum())
    }

    /// Fare of every key over `dep_idx..arr_idx`, for query views
    #[must_use]
    pub fn seat_prices(&self, dep_idx: u8, arr_idx: u8) -> HashMap<String, Money> {
        self.fares
            .keys()
            .filter_map(|key| Some((key.clone(), self.fare_between(key, dep_idx, arr_idx)?)))
            .collect()
    }

    /// Price of one concrete booking. Berth classes price per tier, keyed
    /// by the seat number.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::PriceUnavailable`] when the fare table lacks
    /// the needed key.
    pub fn order_price(
        &self,
        seat_class: SeatClass,
        seat_num: Option<&str>,
        dep_idx: u8,
        arr_idx: u8,
    ) -> Result<Money> {
        let key = berth_price_key(seat_class, seat_num);
        self.fare_between(&key, dep_idx, arr_idx)
            .ok_or(BookingError::PriceUnavailable { key })
    }

    /// Wall-clock departure and arrival for a run departing its origin on
    /// `departure_date`.
    #[must_use]
    pub fn dep_arr_times(
        &self,
        departure_date: NaiveDate,
        dep_idx: u8,
        arr_idx: u8,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.timetable[dep_idx as usize].dep.to_utc(departure_date),
            self.timetable[arr_idx as usize].arr.to_utc(departure_date),
        )
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// The loaded, immutable catalog.
pub struct Catalog {
    trains: Vec<Arc<TrainInfo>>,
    city_trains: HashMap<String, Vec<usize>>,
    stations: HashMap<String, Station>,
}

impl Catalog {
    /// Loads every train effective in `[today, today + window]`, fanning
    /// per-train metadata fetches out over a bounded worker pool.
    ///
    /// # Errors
    ///
    /// Surfaces the first collaborator failure; a partially-loaded catalog
    /// is never returned.
    pub async fn load(
        source: Arc<dyn CatalogSource>,
        config: &CoreConfig,
        today: NaiveDate,
    ) -> Result<Self> {
        let started = std::time::Instant::now();
        let stations: HashMap<String, Station> = source
            .stations()
            .await?
            .into_iter()
            .map(|s| (s.station_code.clone(), s))
            .collect();
        let cars: Arc<HashMap<u32, CarRecord>> = Arc::new(
            source
                .cars()
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect(),
        );

        let window_end = today + Duration::days(i64::from(config.catalog_window_days));
        let records = source.trains_in_window(today, window_end).await?;
        let record_count = records.len();

        let permits = Arc::new(Semaphore::new(config.catalog_load_parallelism.max(1)));
        let mut tasks: JoinSet<std::result::Result<TrainInfo, StoreError>> = JoinSet::new();
        for record in records {
            let source = Arc::clone(&source);
            let cars = Arc::clone(&cars);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| StoreError("catalog load pool closed".to_string()))?;
                let timetable = source.timetable(record.id).await?;
                let prices = source.route_prices(record.id).await?;
                TrainInfo::build(record, timetable, prices, &cars)
            });
        }

        let mut trains = Vec::with_capacity(record_count);
        while let Some(joined) = tasks.join_next().await {
            let info = joined
                .map_err(|e| StoreError(format!("catalog load task failed: {e}")))??;
            trains.push(Arc::new(info));
        }
        trains.sort_by(|a, b| {
            (&a.train_num, a.enable_start).cmp(&(&b.train_num, b.enable_start))
        });

        let mut city_trains: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, train) in trains.iter().enumerate() {
            for row in &train.timetable {
                let entry = city_trains.entry(row.city_code.clone()).or_default();
                // A train may stop twice in one city; index it once.
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }

        tracing::info!(
            trains = trains.len(),
            stations = stations.len(),
            window_days = config.catalog_window_days,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "catalog loaded"
        );

        Ok(Self {
            trains,
            city_trains,
            stations,
        })
    }

    /// Looks a station up by code
    #[must_use]
    pub fn station(&self, station_code: &str) -> Option<&Station> {
        self.stations.get(station_code)
    }

    /// All loaded trains, sorted by `(train_num, enable_start)`
    #[must_use]
    pub fn trains(&self) -> &[Arc<TrainInfo>] {
        &self.trains
    }

    /// The train record effective and scheduled on `date`.
    ///
    /// Trains are sorted by `(train_num, enable_start)`; successive
    /// schedule versions of one number sit adjacent, so a scan with a
    /// filter finds the effective one and stops at the end of the group.
    #[must_use]
    pub fn train_info(&self, train_num: &TrainNumber, date: NaiveDate) -> Option<Arc<TrainInfo>> {
        self.trains
            .iter()
            .skip_while(|t| t.train_num < *train_num)
            .take_while(|t| t.train_num == *train_num)
            .find(|t| t.runs_on(date))
            .cloned()
    }

    /// Trains passing both stations' cities, probing the smaller side.
    #[must_use]
    pub fn via_trains(&self, dep_station: &Station, arr_station: &Station) -> Vec<Arc<TrainInfo>> {
        let Some(dep_side) = self.city_trains.get(&dep_station.city_code) else {
            return Vec::new();
        };
        let Some(arr_side) = self.city_trains.get(&arr_station.city_code) else {
            return Vec::new();
        };
        let (probe, scan) = if arr_side.len() < dep_side.len() {
            (arr_side, dep_side)
        } else {
            (dep_side, arr_side)
        };
        let probe: std::collections::HashSet<usize> = probe.iter().copied().collect();
        scan.iter()
            .filter(|idx| probe.contains(idx))
            .map(|&idx| Arc::clone(&self.trains[idx]))
            .collect()
    }
}

// ============================================================================
// In-memory source (fixtures, demos, tests)
// ============================================================================

/// A [`CatalogSource`] over in-memory fixtures.
#[derive(Default)]
pub struct InMemoryCatalogSource {
    stations: Vec<Station>,
    cars: Vec<CarRecord>,
    trains: Vec<TrainRecord>,
    timetables: HashMap<u64, Vec<RouteRow>>,
    prices: HashMap<u64, Vec<RoutePriceRow>>,
}

impl InMemoryCatalogSource {
    /// Creates an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a station
    #[must_use]
    pub fn with_station(mut self, station: Station) -> Self {
        self.stations.push(station);
        self
    }

    /// Adds a car design
    #[must_use]
    pub fn with_car(mut self, car: CarRecord) -> Self {
        self.cars.push(car);
        self
    }

    /// Adds a train with its timetable and fare rows
    #[must_use]
    pub fn with_train(
        mut self,
        record: TrainRecord,
        timetable: Vec<RouteRow>,
        prices: Vec<RoutePriceRow>,
    ) -> Self {
        self.timetables.insert(record.id, timetable);
        self.prices.insert(record.id, prices);
        self.trains.push(record);
        self
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalogSource {
    async fn stations(&self) -> std::result::Result<Vec<Station>, StoreError> {
        Ok(self.stations.clone())
    }

    async fn cars(&self) -> std::result::Result<Vec<CarRecord>, StoreError> {
        Ok(self.cars.clone())
    }

    async fn trains_in_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<Vec<TrainRecord>, StoreError> {
        Ok(self
            .trains
            .iter()
            .filter(|t| t.enable_end >= from && t.enable_start <= to)
            .cloned()
            .collect())
    }

    async fn timetable(&self, train_id: u64) -> std::result::Result<Vec<RouteRow>, StoreError> {
        self.timetables
            .get(&train_id)
            .cloned()
            .ok_or_else(|| StoreError(format!("no timetable for train id {train_id}")))
    }

    async fn route_prices(
        &self,
        train_id: u64,
    ) -> std::result::Result<Vec<RoutePriceRow>, StoreError> {
        self.prices
            .get(&train_id)
            .cloned()
            .ok_or_else(|| StoreError(format!("no fares for train id {train_id}")))
    }
}
