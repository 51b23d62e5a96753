//! Schedule instances: one train running on one departure date.
//!
//! An instance owns the mutable seat inventory for that run. Instances are
//! materialized lazily on first touch and retired once the run has
//! concluded; the static catalog stays immutable throughout.

use crate::catalog::TrainInfo;
use crate::inventory::CarInventory;
use crate::types::{SeatClass, TrainNumber};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One train run: a departure date plus live per-car inventory.
pub struct ScheduleInstance {
    /// Departure date of the origin station
    pub departure_date: NaiveDate,
    /// The static train this run follows
    pub train: Arc<TrainInfo>,
    cars: Vec<CarInventory>,
}

impl ScheduleInstance {
    /// Materializes a fully-available run of `train` on `departure_date`.
    #[must_use]
    pub fn new(train: Arc<TrainInfo>, departure_date: NaiveDate) -> Self {
        let segment_count = train.segment_count();
        let cars = train
            .car_template
            .iter()
            .enumerate()
            .map(|(position, template)| {
                CarInventory::new(
                    position as u8 + 1,
                    template.seat_class,
                    template.seats.as_ref().clone(),
                    template.standing_capacity,
                    segment_count,
                )
            })
            .collect();
        Self {
            departure_date,
            train,
            cars,
        }
    }

    /// All cars in formation order
    #[must_use]
    pub fn cars(&self) -> &[CarInventory] {
        &self.cars
    }

    /// The car at a 1-based car number
    #[must_use]
    pub fn car(&self, car_num: u8) -> Option<&CarInventory> {
        self.cars.get(car_num.saturating_sub(1) as usize)
    }

    /// Cars of one class, in formation appearance order.
    ///
    /// A class may occupy non-contiguous positions in the formation.
    pub fn cars_of_class(&self, seat_class: SeatClass) -> impl Iterator<Item = &CarInventory> {
        self.train
            .class_car_positions
            .get(&seat_class)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&position| &self.cars[position as usize])
    }

    /// Whether the run's terminal arrival lies before `now`
    #[must_use]
    pub fn concluded_by(&self, now: DateTime<Utc>) -> bool {
        let last = self.train.segment_count();
        let (_, terminal_arrival) = self.train.dep_arr_times(self.departure_date, 0, last);
        terminal_arrival < now
    }
}

/// Lazily-materialized registry of schedule instances, keyed by
/// `(train number, departure date)`.
#[derive(Default)]
pub struct ScheduleRegistry {
    inner: RwLock<HashMap<(TrainNumber, NaiveDate), Arc<ScheduleInstance>>>,
}

impl ScheduleRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `(train, departure_date)`, materializing it
    /// on first touch.
    #[must_use]
    pub fn instance(
        &self,
        train: &Arc<TrainInfo>,
        departure_date: NaiveDate,
    ) -> Arc<ScheduleInstance> {
        let key = (train.train_num.clone(), departure_date);
        if let Some(existing) = self.read().get(&key) {
            return Arc::clone(existing);
        }
        let mut map = self.write();
        // Lost the race to another materializer? Use theirs.
        if let Some(existing) = map.get(&key) {
            return Arc::clone(existing);
        }
        let instance = Arc::new(ScheduleInstance::new(Arc::clone(train), departure_date));
        map.insert(key, Arc::clone(&instance));
        instance
    }

    /// The instance for `(train number, departure date)` if one is live
    #[must_use]
    pub fn get(&self, train_num: &TrainNumber, departure_date: NaiveDate) -> Option<Arc<ScheduleInstance>> {
        self.read()
            .get(&(train_num.clone(), departure_date))
            .cloned()
    }

    /// Number of live instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no instance is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every instance whose run concluded before `now`. Returns how
    /// many were retired.
    pub fn retire_concluded(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, instance| !instance.concluded_by(now));
        before - map.len()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<(TrainNumber, NaiveDate), Arc<ScheduleInstance>>>
    {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<(TrainNumber, NaiveDate), Arc<ScheduleInstance>>>
    {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
