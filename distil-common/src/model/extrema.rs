//! Extrema and histogram bucket arithmetic

use serde::{Deserialize, Serialize};

use crate::model::types::is_floating_point_type;

/// Maximum number of buckets for a numeric histogram.
pub const MAX_NUM_BUCKETS: i64 = 50;

/// Observed min/max of a single variable (or derived expression).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrema {
    #[serde(skip)]
    pub key: String,
    #[serde(skip)]
    pub ty: String,
    pub min: f64,
    pub max: f64,
}

impl Extrema {
    pub fn new(key: &str, ty: &str, min: f64, max: f64) -> Self {
        Extrema {
            key: key.to_string(),
            ty: ty.to_string(),
            min,
            max,
        }
    }

    /// Bucket width for this range. Floating point domains snap to a
    /// "human" interval with significand in {1, 2, 5}; integer domains use
    /// a width of at least one whole unit.
    pub fn bucket_interval(&self) -> f64 {
        if is_floating_point_type(&self.ty) {
            round_interval((self.max - self.min).abs() / MAX_NUM_BUCKETS as f64)
        } else {
            let range = self.max - self.min;
            if (range as i64) < MAX_NUM_BUCKETS {
                1.0
            } else {
                (range / MAX_NUM_BUCKETS as f64).ceil()
            }
        }
    }

    /// Number of buckets over the snapped domain; at most [`MAX_NUM_BUCKETS`].
    pub fn bucket_count(&self) -> i64 {
        let interval = self.bucket_interval();
        let rounded = self.bucket_min_max();
        ((rounded.max - rounded.min) / interval).round() as i64
    }

    /// Bucket domain floored/ceiled to a multiple of the interval. When the
    /// domain straddles zero the bounds are instead walked outward from zero
    /// in interval steps, guaranteeing a bucket boundary at zero.
    pub fn bucket_min_max(&self) -> Extrema {
        let interval = self.bucket_interval();
        let rounded_min = floor_by_unit(self.min, interval);
        let rounded_max = ceil_by_unit(self.max, interval);

        if rounded_min > 0.0 || rounded_min < 0.0 {
            if (-rounded_min / interval).fract() != 0.0 {
                // straddles zero on a non-aligned boundary
                let mut new_min = 0.0;
                while new_min > rounded_min {
                    new_min -= interval;
                }
                let mut new_max = 0.0;
                while new_max < rounded_max {
                    new_max += interval;
                }
                return Extrema {
                    key: self.key.clone(),
                    ty: self.ty.clone(),
                    min: new_min,
                    max: new_max,
                };
            }
        }

        Extrema {
            key: self.key.clone(),
            ty: self.ty.clone(),
            min: rounded_min,
            max: rounded_max,
        }
    }
}

fn floor_by_unit(x: f64, unit: f64) -> f64 {
    (x / unit).floor() * unit
}

fn ceil_by_unit(x: f64, unit: f64) -> f64 {
    (x / unit).ceil() * unit
}

/// Snaps a raw interval to the nearest not-smaller {1,2,5}·10^k value.
fn round_interval(interval: f64) -> f64 {
    if interval <= 0.0 {
        // degenerate domain (min == max)
        return 1.0;
    }
    let round = 10f64.powf(interval.log10().floor());
    let scaled = interval / round;
    let snap = if scaled <= 2.0 {
        2.0
    } else if scaled <= 5.0 {
        5.0
    } else {
        10.0
    };
    snap * round
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{FLOAT_TYPE, INTEGER_TYPE};

    #[test]
    fn interval_significand_is_snapped() {
        for (min, max) in [(0.0, 1.0), (0.0, 33.0), (-4.2, 917.0), (0.001, 0.037)] {
            let e = Extrema::new("v", FLOAT_TYPE, min, max);
            let interval = e.bucket_interval();
            let mantissa = interval / 10f64.powf(interval.log10().floor());
            let snapped = [1.0, 2.0, 5.0, 10.0]
                .iter()
                .any(|s| (mantissa - s).abs() < 1e-9);
            assert!(snapped, "interval {interval} for ({min},{max}) not snapped");
        }
    }

    #[test]
    fn bucket_count_never_exceeds_max() {
        for (min, max) in [(0.0, 1.0), (-250.0, 4.0), (3.0, 3.7), (1.0, 100_000.0)] {
            let e = Extrema::new("v", FLOAT_TYPE, min, max);
            assert!(e.bucket_count() <= MAX_NUM_BUCKETS, "({min},{max})");
            assert!(e.bucket_count() > 0, "({min},{max})");
        }
    }

    #[test]
    fn zero_straddling_domain_gets_zero_boundary() {
        let e = Extrema::new("v", FLOAT_TYPE, -4.2, 10.0);
        let rounded = e.bucket_min_max();
        let interval = e.bucket_interval();
        assert!(rounded.min <= -4.2 && rounded.max >= 10.0);
        // zero must fall on a bucket edge
        let steps = -rounded.min / interval;
        assert!((steps - steps.round()).abs() < 1e-9);
    }

    #[test]
    fn small_integer_range_uses_unit_buckets() {
        let e = Extrema::new("v", INTEGER_TYPE, 0.0, 10.0);
        assert_eq!(e.bucket_interval(), 1.0);
        assert_eq!(e.bucket_count(), 10);
    }
}
