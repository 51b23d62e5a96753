//! Station-pair availability queries.
//!
//! Given a departure station, an arrival station, and a travel date, finds
//! every train whose timetable contains both stations in order and whose
//! effective calendar covers the date, and snapshots per-class seat and
//! standing availability plus fares for the segment range.

use crate::catalog::Catalog;
use crate::schedule::ScheduleRegistry;
use crate::types::{Money, SeatClass, TrainNumber};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Availability of one seat class on one journey option
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAvailability {
    /// Seats free across the whole requested range
    pub seats: u32,
    /// Standing slots free across the whole requested range
    pub standing: u32,
}

/// One bookable journey returned by a query
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyOption {
    /// Train number
    pub train_num: TrainNumber,
    /// Departure date of the train's origin station (pass this to
    /// `submit_order`; for a cross-midnight boarding it precedes the
    /// queried date)
    pub departure_date: NaiveDate,
    /// Boarding station index
    pub dep_idx: u8,
    /// Alighting station index
    pub arr_idx: u8,
    /// Boarding station name
    pub dep_station: String,
    /// Alighting station name
    pub arr_station: String,
    /// Wall-clock departure
    pub dep_time: DateTime<Utc>,
    /// Wall-clock arrival
    pub arr_time: DateTime<Utc>,
    /// Whether tickets are on sale
    pub is_selling: bool,
    /// Why the train is not selling, when it is not
    pub not_selling_remark: Option<String>,
    /// Per-class availability over the range
    pub availability: HashMap<SeatClass, ClassAvailability>,
    /// Fare per fare-table key over the range (berth classes appear once
    /// per tier)
    pub prices: HashMap<String, Money>,
}

/// Read-side facade over the catalog and the live seat inventory.
pub struct QueryService {
    catalog: Arc<Catalog>,
    schedules: Arc<ScheduleRegistry>,
}

impl QueryService {
    /// Creates a query service over shared handles.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, schedules: Arc<ScheduleRegistry>) -> Self {
        Self { catalog, schedules }
    }

    /// Journeys from `dep_code` to `arr_code` on `date`, one entry per
    /// matching train. Unknown station codes simply match nothing.
    #[must_use]
    pub fn search(&self, dep_code: &str, arr_code: &str, date: NaiveDate) -> Vec<JourneyOption> {
        let (Some(dep_station), Some(arr_station)) =
            (self.catalog.station(dep_code), self.catalog.station(arr_code))
        else {
            return Vec::new();
        };

        let mut options = Vec::new();
        for train in self.catalog.via_trains(dep_station, arr_station) {
            let Some(journey) = train.match_query(dep_station, arr_station, date) else {
                continue;
            };

            let schedule = self.schedules.instance(&train, journey.departure_date);
            let mut availability = HashMap::new();
            for &seat_class in train.class_car_positions.keys() {
                let mut total = ClassAvailability::default();
                for car in schedule.cars_of_class(seat_class) {
                    let car_avail = car.availability(journey.dep_idx, journey.arr_idx);
                    total.seats += car_avail.seats;
                    total.standing += car_avail.standing;
                }
                availability.insert(seat_class, total);
            }

            let (dep_time, arr_time) =
                train.dep_arr_times(journey.departure_date, journey.dep_idx, journey.arr_idx);
            options.push(JourneyOption {
                train_num: train.train_num.clone(),
                departure_date: journey.departure_date,
                dep_idx: journey.dep_idx,
                arr_idx: journey.arr_idx,
                dep_station: train.timetable[usize::from(journey.dep_idx)]
                    .station_name
                    .clone(),
                arr_station: train.timetable[usize::from(journey.arr_idx)]
                    .station_name
                    .clone(),
                dep_time,
                arr_time,
                is_selling: train.is_selling,
                not_selling_remark: train.not_selling_remark.clone(),
                availability,
                prices: train.seat_prices(journey.dep_idx, journey.arr_idx),
            });
        }
        options.sort_by(|a, b| a.dep_time.cmp(&b.dep_time));

        tracing::debug!(
            dep = dep_code,
            arr = arr_code,
            %date,
            matches = options.len(),
            "availability query"
        );
        options
    }
}
