//! Per-car seat inventory.
//!
//! One [`CarInventory`] tracks every seat of one car on one schedule
//! instance, plus the car's standing-ticket quota per segment. All mutation
//! happens under the car's own mutex: contention is per car, not per train,
//! and a reservation touches exactly one car. Critical sections contain no
//! I/O and no allocation.

use crate::segment::SegmentMask;
use crate::types::SeatClass;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Immutable description of one seat
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMeta {
    /// Seat number, e.g. `05A` or `03-U2` for berths
    pub seat_num: String,
    /// Whether the seat is earmarked for student fares
    pub is_student: bool,
}

impl SeatMeta {
    /// Creates a `SeatMeta`
    #[must_use]
    pub const fn new(seat_num: String, is_student: bool) -> Self {
        Self {
            seat_num,
            is_student,
        }
    }
}

/// Mutable occupancy state, guarded by the car mutex
struct CarOccupancy {
    /// One mask per seat, index-aligned with `CarInventory::seats`
    seat_masks: Vec<SegmentMask>,
    /// Standing slots left per segment
    standing_remaining: Vec<u16>,
    /// Reservations ever committed per segment (audit; never decremented
    /// during the instance's life)
    traveller_count: Vec<u32>,
}

/// Availability snapshot of one car over a segment range
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarAvailability {
    /// Seats free across the whole range
    pub seats: u32,
    /// Standing slots free across the whole range
    pub standing: u32,
}

/// Seat and standing inventory for one car on one schedule instance.
pub struct CarInventory {
    /// Car number, 1-based position in the formation
    pub car_num: u8,
    /// Seat class of every seat in this car
    pub seat_class: SeatClass,
    /// Immutable seat metadata
    pub seats: Vec<SeatMeta>,
    segment_count: u8,
    occupancy: Mutex<CarOccupancy>,
}

impl CarInventory {
    /// Creates a fully-available car for a journey of `segment_count`
    /// segments with `standing_capacity` standing slots.
    #[must_use]
    pub fn new(
        car_num: u8,
        seat_class: SeatClass,
        seats: Vec<SeatMeta>,
        standing_capacity: u16,
        segment_count: u8,
    ) -> Self {
        let occupancy = CarOccupancy {
            seat_masks: vec![SegmentMask::EMPTY; seats.len()],
            standing_remaining: vec![standing_capacity; segment_count as usize],
            traveller_count: vec![0; segment_count as usize],
        };
        Self {
            car_num,
            seat_class,
            seats,
            segment_count,
            occupancy: Mutex::new(occupancy),
        }
    }

    /// Number of segments of the journey this car serves
    #[must_use]
    pub const fn segment_count(&self) -> u8 {
        self.segment_count
    }

    /// Tries to reserve one seat free over `dep_idx..arr_idx`.
    ///
    /// Seats are scanned in a fixed order (index 0 upward), in two passes:
    /// regular seats first, student-fare seats only when
    /// `accept_student_seat` is set. On success the seat's segments are
    /// marked sold atomically and the seat index is returned.
    pub fn try_reserve_seat(
        &self,
        dep_idx: u8,
        arr_idx: u8,
        accept_student_seat: bool,
    ) -> Option<usize> {
        let requested = SegmentMask::for_range(dep_idx, arr_idx);
        let mut occ = self.lock();
        for pass_student in [false, true] {
            if pass_student && !accept_student_seat {
                break;
            }
            for (idx, seat) in self.seats.iter().enumerate() {
                if seat.is_student != pass_student {
                    continue;
                }
                if !occ.seat_masks[idx].intersects(requested) {
                    occ.seat_masks[idx].set_range(dep_idx, arr_idx);
                    Self::record_travellers(&mut occ, dep_idx, arr_idx);
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Tries to reserve one standing slot over `dep_idx..arr_idx`.
    ///
    /// Succeeds iff every segment in the range has a slot left, in which
    /// case each is decremented.
    pub fn try_reserve_standing(&self, dep_idx: u8, arr_idx: u8) -> bool {
        let mut occ = self.lock();
        let range = dep_idx as usize..arr_idx as usize;
        if occ.standing_remaining[range.clone()].iter().any(|&n| n == 0) {
            return false;
        }
        for n in &mut occ.standing_remaining[range] {
            *n -= 1;
        }
        Self::record_travellers(&mut occ, dep_idx, arr_idx);
        true
    }

    /// Releases a seat reservation over exactly the range it was made with.
    pub fn release_seat(&self, seat_idx: usize, dep_idx: u8, arr_idx: u8) {
        let mut occ = self.lock();
        occ.seat_masks[seat_idx].clear_range(dep_idx, arr_idx);
    }

    /// Releases a standing reservation over exactly the range it was made
    /// with.
    pub fn release_standing(&self, dep_idx: u8, arr_idx: u8) {
        let mut occ = self.lock();
        for n in &mut occ.standing_remaining[dep_idx as usize..arr_idx as usize] {
            *n += 1;
        }
    }

    /// Re-applies a persisted seat reservation after a restart.
    ///
    /// Returns `false` if the seat is unknown or the range is already
    /// partly sold (a corrupt store).
    pub fn restore_seat(&self, seat_num: &str, dep_idx: u8, arr_idx: u8) -> bool {
        let Some(idx) = self.seat_index(seat_num) else {
            return false;
        };
        let requested = SegmentMask::for_range(dep_idx, arr_idx);
        let mut occ = self.lock();
        if occ.seat_masks[idx].intersects(requested) {
            return false;
        }
        occ.seat_masks[idx].set_range(dep_idx, arr_idx);
        Self::record_travellers(&mut occ, dep_idx, arr_idx);
        true
    }

    /// Re-applies a persisted standing reservation after a restart.
    pub fn restore_standing(&self, dep_idx: u8, arr_idx: u8) -> bool {
        self.try_reserve_standing(dep_idx, arr_idx)
    }

    /// Index of a seat by its number
    #[must_use]
    pub fn seat_index(&self, seat_num: &str) -> Option<usize> {
        self.seats.iter().position(|s| s.seat_num == seat_num)
    }

    /// Counts free seats and standing slots over `dep_idx..arr_idx`.
    #[must_use]
    pub fn availability(&self, dep_idx: u8, arr_idx: u8) -> CarAvailability {
        let requested = SegmentMask::for_range(dep_idx, arr_idx);
        let occ = self.lock();
        let seats = occ
            .seat_masks
            .iter()
            .filter(|m| !m.intersects(requested))
            .count() as u32;
        let standing = occ.standing_remaining[dep_idx as usize..arr_idx as usize]
            .iter()
            .copied()
            .min()
            .unwrap_or(0);
        CarAvailability {
            seats,
            standing: u32::from(standing),
        }
    }

    /// The seat mask currently held for `seat_idx`
    #[must_use]
    pub fn seat_mask(&self, seat_idx: usize) -> SegmentMask {
        self.lock().seat_masks[seat_idx]
    }

    /// Standing slots left on each segment
    #[must_use]
    pub fn standing_remaining(&self) -> Vec<u16> {
        self.lock().standing_remaining.clone()
    }

    /// Audit counter: reservations ever committed per segment
    #[must_use]
    pub fn traveller_counts(&self) -> Vec<u32> {
        self.lock().traveller_count.clone()
    }

    fn record_travellers(occ: &mut CarOccupancy, dep_idx: u8, arr_idx: u8) {
        for n in &mut occ.traveller_count[dep_idx as usize..arr_idx as usize] {
            *n += 1;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CarOccupancy> {
        // A poisoned car mutex means a panic inside a pure bitmap update;
        // the state is still coherent, so keep serving.
        self.occupancy
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
