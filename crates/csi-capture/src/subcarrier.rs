//! Subcarrier index tables and linear phase calibration.
//!
//! Grouped CSI reports a subset of the OFDM subcarriers. For a bandwidth
//! `bw` and grouping `ng` (IEEE 802.11-2016, table 9-54) the reported
//! indices are
//!
//! ```text
//! a = 1.5·bw − 2, b = bw / 20
//! k = [−a, −a+ng, …, <−b] ++ [−b] ++ [b, b+ng, …, <a] ++ [a]
//! ```

use std::f64::consts::PI;

use ndarray::{Array, ArrayViewMut1, Axis, Dimension};

use crate::error::{CsiError, CsiResult};

/// Reported subcarrier indices for `bw` MHz and grouping `ng`.
///
/// Only 20/40 MHz and groupings 1, 2 and 4 are defined.
pub fn subcarrier_indices(bw: u16, ng: u8) -> CsiResult<Vec<i32>> {
    if !matches!(bw, 20 | 40) {
        return Err(CsiError::invalid_config("bw", format!("{bw} MHz, expected 20 or 40")));
    }
    if !matches!(ng, 1 | 2 | 4) {
        return Err(CsiError::invalid_config("ng", format!("{ng}, expected 1, 2 or 4")));
    }
    let bw = i32::from(bw);
    let (a, b) = (bw * 3 / 2 - 2, bw / 20);
    let step = usize::from(ng);

    let mut k: Vec<i32> = (-a..-b).step_by(step).collect();
    k.push(-b);
    k.extend((b..a).step_by(step));
    k.push(a);
    Ok(k)
}

/// Indices of QCA9300 CSI tones: every subcarrier.
pub fn qca9300_subcarriers(cbw: u16) -> Vec<i32> {
    subcarrier_indices(cbw, 1).unwrap_or_default()
}

/// Indices of the 30 tones reported by the IWL5300.
pub fn iwl5300_subcarriers(cbw: u16) -> Vec<i32> {
    let ng = if cbw == 20 { 2 } else { 4 };
    subcarrier_indices(cbw, ng).unwrap_or_default()
}

/// Pilot positions within a tone array, by channel layout.
pub mod pilots {
    /// Non-HT 20 MHz, 52 tones.
    pub const NON_HT_20_52: [usize; 4] = [5, 19, 32, 46];
    /// HT/VHT 20 MHz, 56 tones.
    pub const HT_VHT_20_56: [usize; 4] = [7, 21, 34, 48];
    /// HT/VHT 40 MHz, 114 tones.
    pub const HT_VHT_40_114: [usize; 6] = [5, 33, 47, 66, 80, 108];
    /// VHT 80 MHz, 242 tones.
    pub const VHT_80_242: [usize; 8] = [19, 47, 83, 111, 130, 158, 194, 222];

    /// Pilot positions for an array of `tones` tones, if the layout is known.
    pub fn for_tone_count(tones: usize) -> Option<&'static [usize]> {
        match tones {
            52 => Some(&NON_HT_20_52),
            56 => Some(&HT_VHT_20_56),
            114 => Some(&HT_VHT_40_114),
            242 => Some(&VHT_80_242),
            _ => None,
        }
    }
}

/// Remove 2π discontinuities in place.
pub fn unwrap_phase(data: &mut [f64]) {
    let mut correction = 0.0;
    let Some(&first) = data.first() else {
        return;
    };
    let mut prev = first;
    for value in data.iter_mut().skip(1) {
        let wrapped = *value;
        let diff = wrapped - prev;
        if diff > PI {
            correction -= 2.0 * PI * ((diff + PI) / (2.0 * PI)).floor();
        } else if diff < -PI {
            correction += 2.0 * PI * ((-diff + PI) / (2.0 * PI)).floor();
        }
        *value = wrapped + correction;
        prev = wrapped;
    }
}

/// Remove the linear term `a·k + b` from unwrapped phase along `axis`.
///
/// `a` is the slope between the first and last subcarrier and `b` the mean
/// phase of each lane.
pub fn calibrate_phase<D: Dimension>(
    phase: &Array<f64, D>,
    bw: u16,
    ng: u8,
    axis: usize,
) -> CsiResult<Array<f64, D>> {
    let k = subcarrier_indices(bw, ng)?;
    if axis >= phase.ndim() {
        return Err(CsiError::invalid_config(
            "axis",
            format!("{axis} out of range for {} dimensions", phase.ndim()),
        ));
    }
    let len = phase.len_of(Axis(axis));
    if len != k.len() {
        return Err(CsiError::dimension("subcarriers", len, k.len()));
    }

    let mut out = phase.to_owned();
    for lane in out.lanes_mut(Axis(axis)) {
        calibrate_lane(lane, &k);
    }
    Ok(out)
}

fn calibrate_lane(mut lane: ArrayViewMut1<'_, f64>, k: &[i32]) {
    let n = k.len();
    let slope = (lane[n - 1] - lane[0]) / f64::from(k[n - 1] - k[0]);
    let mean = lane.mean().unwrap_or(0.0);
    for (p, &ki) in lane.iter_mut().zip(k) {
        *p -= slope * f64::from(ki) + mean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_grouping_tables() {
        let k = subcarrier_indices(20, 2).unwrap();
        assert_eq!(k.len(), 30);
        assert_eq!(&k[..3], &[-28, -26, -24]);
        assert_eq!(&k[13..17], &[-2, -1, 1, 3]);
        assert_eq!(k[29], 28);

        let k = subcarrier_indices(40, 4).unwrap();
        assert_eq!(k.len(), 30);
        assert_eq!(&k[13..17], &[-6, -2, 2, 6]);

        assert_eq!(subcarrier_indices(20, 1).unwrap().len(), 56);
        assert_eq!(subcarrier_indices(40, 2).unwrap().len(), 58);
    }

    #[test]
    fn test_invalid_grouping() {
        assert!(matches!(
            subcarrier_indices(80, 1),
            Err(CsiError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            subcarrier_indices(20, 3),
            Err(CsiError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_device_tables() {
        let iwl = iwl5300_subcarriers(20);
        assert_eq!(iwl.len(), 30);
        assert_eq!(iwl[14], -1);
        assert_eq!(iwl5300_subcarriers(40)[0], -58);

        let qca = qca9300_subcarriers(20);
        assert_eq!(qca.len(), 56);
        assert_eq!(qca[27], -1);
        assert_eq!(qca[28], 1);
        assert_eq!(qca9300_subcarriers(40).len(), 114);
        assert!(qca9300_subcarriers(80).is_empty());
    }

    #[test]
    fn test_pilot_positions_hit_pilot_subcarriers() {
        let tones = qca9300_subcarriers(20);
        let found: Vec<i32> = pilots::HT_VHT_20_56.iter().map(|&p| tones[p]).collect();
        assert_eq!(found, vec![-21, -7, 7, 21]);

        let tones = qca9300_subcarriers(40);
        let found: Vec<i32> = pilots::HT_VHT_40_114.iter().map(|&p| tones[p]).collect();
        assert_eq!(found, vec![-53, -25, -11, 11, 25, 53]);

        assert!(pilots::for_tone_count(30).is_none());
    }

    #[test]
    fn test_unwrap_phase() {
        let truth: Vec<f64> = (0..20).map(|i| i as f64 * 0.9).collect();
        let mut wrapped: Vec<f64> = truth
            .iter()
            .map(|p| (p + PI).rem_euclid(2.0 * PI) - PI)
            .collect();
        unwrap_phase(&mut wrapped);
        for (a, b) in wrapped.iter().zip(&truth) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_calibrate_removes_linear_phase() {
        let k = subcarrier_indices(20, 2).unwrap();
        let phase = Array2::from_shape_fn((3, 30), |(p, s)| 0.05 * f64::from(k[s]) + p as f64);
        let calibrated = calibrate_phase(&phase, 20, 2, 1).unwrap();
        for v in calibrated.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_calibrate_shape_checks() {
        let phase = Array2::<f64>::zeros((3, 29));
        assert!(matches!(
            calibrate_phase(&phase, 20, 2, 1),
            Err(CsiError::DimensionMismatch { declared: 29, capacity: 30, .. })
        ));
        assert!(matches!(
            calibrate_phase(&phase, 20, 2, 2),
            Err(CsiError::InvalidConfiguration { .. })
        ));
    }
}
