//! Time partitioning
//!
//! The timeline is cut into fixed-width, half-open buckets aligned to a grid
//! anchored at a configured epoch:
//!
//! ```text
//! epoch          epoch+w        epoch+2w       epoch+3w
//!   |--------------|--------------|--------------|
//!   [  partition 0 )[ partition 1 )[ partition 2 )
//! ```
//!
//! Timestamps before the epoch map to negative buckets; the grid extends in
//! both directions.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Default partition width in days
pub const DEFAULT_WIDTH_DAYS: i64 = 7;

/// Grid used to map timestamps onto partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionScheme {
    epoch: DateTime<Utc>,
    width_micros: i64,
}

impl Default for PartitionScheme {
    fn default() -> Self {
        Self {
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            width_micros: Duration::days(DEFAULT_WIDTH_DAYS)
                .num_microseconds()
                .unwrap_or(i64::MAX),
        }
    }
}

impl PartitionScheme {
    /// Create a scheme with the given anchor and bucket width
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidScheme`] for non-positive widths or
    /// widths that do not fit in microseconds.
    pub fn new(epoch: DateTime<Utc>, width: Duration) -> Result<Self, StorageError> {
        let width_micros = width
            .num_microseconds()
            .ok_or_else(|| StorageError::InvalidScheme(format!("width {width} overflows")))?;
        if width_micros <= 0 {
            return Err(StorageError::InvalidScheme(format!(
                "width must be positive, got {width}"
            )));
        }
        Ok(Self {
            epoch,
            width_micros,
        })
    }

    /// Seven-day buckets anchored at `epoch`
    pub fn weekly(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn width(&self) -> Duration {
        Duration::microseconds(self.width_micros)
    }

    pub fn width_micros(&self) -> i64 {
        self.width_micros
    }

    /// Bounds of the partition covering `ts`
    pub fn bounds_for(&self, ts: DateTime<Utc>) -> Result<PartitionBounds, StorageError> {
        let epoch = i128::from(self.epoch.timestamp_micros());
        let width = i128::from(self.width_micros);
        let offset = i128::from(ts.timestamp_micros()) - epoch;
        let start = epoch + offset.div_euclid(width) * width;
        let end = start + width;

        let start = i64::try_from(start)
            .map_err(|_| StorageError::OutOfRange(format!("{ts} before partition grid")))?;
        let end = i64::try_from(end)
            .map_err(|_| StorageError::OutOfRange(format!("{ts} after partition grid")))?;
        PartitionBounds::from_micros(start, end)
    }
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch={} width={}s",
            self.epoch.to_rfc3339(),
            self.width_micros / 1_000_000
        )
    }
}

/// Half-open time range `[start, end)` of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PartitionBounds {
    /// Build bounds from microsecond timestamps
    pub fn from_micros(start: i64, end: i64) -> Result<Self, StorageError> {
        let to_time = |micros: i64| {
            DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| StorageError::OutOfRange(format!("{micros}us")))
        };
        Ok(Self {
            start: to_time(start)?,
            end: to_time(end)?,
        })
    }

    /// Partition key: start of the range in microseconds
    pub fn key(&self) -> i64 {
        self.start.timestamp_micros()
    }

    pub fn end_micros(&self) -> i64 {
        self.end.timestamp_micros()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether the range shares any instant with the inclusive window
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && start < self.end
    }

    /// Whether the whole range lies before `cutoff`
    pub fn expired_by(&self, cutoff: DateTime<Utc>) -> bool {
        self.end <= cutoff
    }

    /// Stable partition name, e.g. `p20250101T000000Z`
    pub fn name(&self) -> String {
        format!("p{}", self.start.format("%Y%m%dT%H%M%SZ"))
    }
}

/// Operational view of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub record_count: u64,
    /// Approximate bytes used by the records (indexes excluded)
    pub approx_bytes: u64,
}

impl PartitionDescriptor {
    pub fn new(bounds: PartitionBounds, record_count: u64, approx_bytes: u64) -> Self {
        Self {
            name: bounds.name(),
            start: bounds.start,
            end: bounds.end,
            record_count,
            approx_bytes,
        }
    }
}

/// Microsecond key window for the inclusive range `[start, end]`
///
/// Keys have microsecond precision, so `start` rounds up and `end` rounds
/// down. `None` when no key falls inside the range.
pub fn key_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<(i64, i64)> {
    let start_us = start
        .timestamp_micros()
        .checked_add(i64::from(start.timestamp_subsec_nanos() % 1_000 != 0))?;
    let end_us = end.timestamp_micros();
    (start_us <= end_us).then_some((start_us, end_us))
}
