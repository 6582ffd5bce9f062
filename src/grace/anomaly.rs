//! Time-mean anomaly and decimal rounding of `(time, lat, lon)` fields.
//!
//! Means skip NaN: a cell with some missing months averages the months it
//! has, and a cell with none has a NaN mean and NaN anomalies.

use ndarray::{Array2, Array3, Axis};

use crate::model::CellMean;

/// Mean over the time axis for every cell, ignoring NaN.
pub fn time_mean(field: &Array3<f64>) -> CellMean {
    let (_, ny, nx) = field.dim();
    let mut sums = Array2::<f64>::zeros((ny, nx));
    let mut counts = Array2::<u32>::zeros((ny, nx));

    for step in field.axis_iter(Axis(0)) {
        for ((sum, count), v) in sums.iter_mut().zip(counts.iter_mut()).zip(step.iter()) {
            if !v.is_nan() {
                *sum += *v;
                *count += 1;
            }
        }
    }

    let mut mean = sums;
    mean.zip_mut_with(&counts, |m, &c| {
        *m = if c > 0 { *m / f64::from(c) } else { f64::NAN };
    });
    mean
}

/// `field - mean` with the mean broadcast over time.
pub fn anomaly(field: &Array3<f64>, mean: &CellMean) -> Array3<f64> {
    field - &mean.view().insert_axis(Axis(0))
}

/// Round to `decimals` places, ties to even, the way array libraries round.
pub fn round_decimals(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

pub fn round_field(field: &mut Array3<f64>, decimals: i32) {
    field.mapv_inplace(|v| round_decimals(v, decimals));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn field() -> Array3<f64> {
        // 3 months over a 1x2 grid; second cell misses a month
        array![[[1.0, 10.0]], [[2.0, f64::NAN]], [[6.0, 20.0]]]
    }

    #[test]
    fn test_time_mean_skips_missing_months() {
        let mean = time_mean(&field());
        assert_eq!(mean, array![[3.0, 15.0]]);
    }

    #[test]
    fn test_all_missing_cell_has_nan_mean() {
        let f = array![[[f64::NAN]], [[f64::NAN]]];
        assert!(time_mean(&f)[[0, 0]].is_nan());
    }

    #[test]
    fn test_anomaly_removes_cell_mean() {
        let f = field();
        let a = anomaly(&f, &time_mean(&f));
        assert_eq!(a[[0, 0, 0]], -2.0);
        assert_eq!(a[[2, 0, 0]], 3.0);
        assert_eq!(a[[0, 0, 1]], -5.0);
        assert!(a[[1, 0, 1]].is_nan());
        // anomalies of a complete series sum to zero
        let total: f64 = a.index_axis(Axis(2), 0).sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn test_round_decimals_ties_to_even() {
        assert_eq!(round_decimals(1.23456, 3), 1.235);
        assert_eq!(round_decimals(-0.0004, 3), -0.0);
        assert_eq!(round_decimals(2.5, 0), 2.0);
        assert_eq!(round_decimals(3.5, 0), 4.0);
        assert!(round_decimals(f64::NAN, 3).is_nan());
    }

    #[test]
    fn test_round_field_in_place() {
        let mut f = array![[[0.12345, 9.87654]]];
        round_field(&mut f, 3);
        assert_eq!(f, array![[[0.123, 9.877]]]);
    }
}
