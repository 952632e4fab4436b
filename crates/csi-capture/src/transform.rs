//! Post-processing of decoded CSI.
//!
//! Every transform has an allocating form that leaves the record untouched
//! and an `*_in_place` form that rewrites the record's own tensor. Intel
//! records remember which scaling has been applied through
//! [`CsiScale`], so calling an in-place transform twice is harmless.

use std::f64::consts::PI;

use ndarray::{Array2, Array3, Array4, ArrayView3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::decoder::intel::{CsiScale, IntelRecord};
use crate::error::{CsiError, CsiResult};
use crate::subcarrier::unwrap_phase;

/// Noise value the firmware reports when it has no estimate.
const NOISE_UNKNOWN: i8 = -127;
/// Thermal noise floor assumed when the noise is unknown, dBm.
const DEFAULT_NOISE_DBM: f64 = -92.0;

fn dbinv(x: f64) -> f64 {
    10f64.powf(x / 10.0)
}

fn db(x: f64) -> f64 {
    10.0 * x.log10()
}

/// Total received signal strength of an Intel record, dBm.
///
/// Chains reporting zero are ignored. With no active chain the result is
/// `-inf`.
pub fn total_rss(record: &IntelRecord) -> f64 {
    let magnitude: f64 = [record.rssi_a, record.rssi_b, record.rssi_c]
        .into_iter()
        .filter(|&r| r != 0)
        .map(|r| dbinv(f64::from(r)))
        .sum();
    db(magnitude) - 44.0 - f64::from(record.agc)
}

/// Factor that converts raw Intel CSI into a channel matrix scaled to the
/// reported RSSI.
fn scale_factor(record: &IntelRecord) -> f64 {
    let csi_pwr: f64 = record.csi.iter().map(|c| c.norm_sqr()).sum();
    if csi_pwr == 0.0 {
        return 0.0;
    }
    let rssi_pwr = dbinv(total_rss(record));
    let scale = rssi_pwr / (csi_pwr / 30.0);

    let noise_db = if record.noise == NOISE_UNKNOWN {
        DEFAULT_NOISE_DBM
    } else {
        f64::from(record.noise)
    };
    let thermal = dbinv(noise_db);
    let quant = scale * f64::from(record.nrx) * f64::from(record.ntx);

    let mut factor = (scale / (thermal + quant)).sqrt();
    match record.ntx {
        2 => factor *= 2f64.sqrt(),
        3 => factor *= dbinv(4.5).sqrt(),
        _ => {}
    }
    factor
}

/// Scaled copy of an Intel record's CSI.
///
/// A record that is already scaled is returned as is.
pub fn scaled_csi(record: &IntelRecord) -> Array3<Complex64> {
    match record.scale {
        CsiScale::Raw => {
            let factor = scale_factor(record);
            record.csi.mapv(|c| c * factor)
        }
        CsiScale::Scaled | CsiScale::ScaledSm => record.csi.clone(),
    }
}

/// Scale an Intel record's CSI in place.
pub fn scaled_csi_in_place(record: &mut IntelRecord) -> &mut Array3<Complex64> {
    if record.scale == CsiScale::Raw {
        let factor = scale_factor(record);
        record.csi.mapv_inplace(|c| c * factor);
        record.scale = CsiScale::Scaled;
    }
    &mut record.csi
}

/// Transmit spatial-mapping matrix used by the IWL5300 for `ntx` streams.
fn spatial_mapping(ntx: usize, is_40mhz: bool) -> CsiResult<Array2<Complex64>> {
    // Phase entries of the 3x3 matrices, in units of 2π.
    const SM_3_20: [[f64; 3]; 3] = [
        [-1.0 / 16.0, -33.0 / 80.0, 3.0 / 80.0],
        [23.0 / 80.0, 13.0 / 48.0, 13.0 / 240.0],
        [-13.0 / 80.0, 37.0 / 240.0, 13.0 / 48.0],
    ];
    const SM_3_40: [[f64; 3]; 3] = [
        [-1.0 / 16.0, -13.0 / 80.0, 23.0 / 80.0],
        [-37.0 / 80.0, -11.0 / 48.0, -107.0 / 240.0],
        [7.0 / 80.0, -83.0 / 240.0, -11.0 / 48.0],
    ];

    let one = Complex64::new(1.0, 0.0);
    let j = Complex64::new(0.0, 1.0);
    match ntx {
        1 => Ok(Array2::eye(1)),
        2 => {
            let entries = if is_40mhz {
                [one, j, j, one]
            } else {
                [one, one, one, -one]
            };
            let sm = Array2::from_shape_vec((2, 2), entries.to_vec())
                .map_err(|e| CsiError::invalid_config("spatial mapping", e.to_string()))?;
            Ok(sm / 2f64.sqrt())
        }
        3 => {
            let phases = if is_40mhz { SM_3_40 } else { SM_3_20 };
            Ok(Array2::from_shape_fn((3, 3), |(r, c)| {
                Complex64::from_polar(1.0 / 3f64.sqrt(), 2.0 * PI * phases[r][c])
            }))
        }
        _ => Err(CsiError::invalid_config(
            "ntx",
            format!("{ntx} transmit streams, expected 1 to 3"),
        )),
    }
}

/// Remove the transmit spatial mapping from `csi` in place.
///
/// Each row `csi[s, r, ..ntx]` is replaced by `row · smᴴ`.
pub fn undo_spatial_mapping_in_place(
    csi: &mut Array3<Complex64>,
    ntx: usize,
    is_40mhz: bool,
) -> CsiResult<()> {
    let sm = spatial_mapping(ntx, is_40mhz)?;
    let capacity = csi.dim().2;
    if ntx > capacity {
        return Err(CsiError::dimension("ntx", ntx, capacity));
    }
    if ntx == 1 {
        return Ok(());
    }

    let mut row = vec![Complex64::default(); ntx];
    for mut lane in csi.lanes_mut(Axis(2)) {
        for (slot, value) in row.iter_mut().zip(lane.iter()) {
            *slot = *value;
        }
        for out in 0..ntx {
            lane[out] = row
                .iter()
                .enumerate()
                .map(|(i, x)| x * sm[[out, i]].conj())
                .sum();
        }
    }
    Ok(())
}

/// Copy of `csi` with the transmit spatial mapping removed.
pub fn undo_spatial_mapping(
    csi: &Array3<Complex64>,
    ntx: usize,
    is_40mhz: bool,
) -> CsiResult<Array3<Complex64>> {
    let mut out = csi.clone();
    undo_spatial_mapping_in_place(&mut out, ntx, is_40mhz)?;
    Ok(out)
}

/// Scaled CSI of an Intel record with the spatial mapping removed.
pub fn scaled_csi_sm(record: &IntelRecord) -> CsiResult<Array3<Complex64>> {
    let is_40mhz = record.is_40mhz();
    let ntx = usize::from(record.ntx);
    match record.scale {
        CsiScale::ScaledSm => Ok(record.csi.clone()),
        CsiScale::Scaled => undo_spatial_mapping(&record.csi, ntx, is_40mhz),
        CsiScale::Raw => {
            let mut csi = scaled_csi(record);
            undo_spatial_mapping_in_place(&mut csi, ntx, is_40mhz)?;
            Ok(csi)
        }
    }
}

/// In-place form of [`scaled_csi_sm`].
pub fn scaled_csi_sm_in_place(record: &mut IntelRecord) -> CsiResult<&mut Array3<Complex64>> {
    if record.scale == CsiScale::ScaledSm {
        return Ok(&mut record.csi);
    }
    let is_40mhz = record.is_40mhz();
    let ntx = usize::from(record.ntx);
    // Validate before touching the tensor so a failure leaves it unchanged.
    spatial_mapping(ntx, is_40mhz)?;
    scaled_csi_in_place(record);
    undo_spatial_mapping_in_place(&mut record.csi, ntx, is_40mhz)?;
    record.scale = CsiScale::ScaledSm;
    Ok(&mut record.csi)
}

/// How CSI is interpolated between subcarriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Interpolate amplitude and unwrapped phase separately.
    #[default]
    AmplitudePhase,
    /// Interpolate real and imaginary parts.
    Iq,
}

/// CSI of one record together with the subcarrier index of each row.
#[derive(Debug, Clone, Copy)]
pub struct CsiSpan<'a> {
    /// Subcarrier index of each row of `csi`.
    pub index: &'a [i32],
    /// CSI `[tones, rx, tx]`.
    pub csi: ArrayView3<'a, Complex64>,
}

impl<'a> CsiSpan<'a> {
    /// Pair an index list with its tensor.
    pub fn new(index: &'a [i32], csi: ArrayView3<'a, Complex64>) -> Self {
        Self { index, csi }
    }
}

/// Several records resampled onto a common subcarrier grid.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedCsi {
    /// Sorted union of every span's subcarriers.
    pub index: Vec<i32>,
    /// CSI `[record, subcarrier, rx, tx]`.
    pub csi: Array4<Complex64>,
}

/// Resample every span onto the union of their subcarrier indices.
///
/// All spans must share the same rx and tx dimensions.
pub fn interpolate_csi(spans: &[CsiSpan<'_>], mode: InterpolationMode) -> CsiResult<InterpolatedCsi> {
    let (nrx, ntx) = match spans.first() {
        Some(span) => {
            let (_, r, t) = span.csi.dim();
            (r, t)
        }
        None => {
            return Ok(InterpolatedCsi {
                index: Vec::new(),
                csi: Array4::zeros((0, 0, 0, 0)),
            })
        }
    };

    let mut grid: Vec<i32> = spans.iter().flat_map(|s| s.index.iter().copied()).collect();
    grid.sort_unstable();
    grid.dedup();

    let mut csi = Array4::zeros((spans.len(), grid.len(), nrx, ntx));
    for (n, span) in spans.iter().enumerate() {
        let (_, r, t) = span.csi.dim();
        if r != nrx {
            return Err(CsiError::dimension("rx", r, nrx));
        }
        if t != ntx {
            return Err(CsiError::dimension("tx", t, ntx));
        }
        let resampled = resample(span.index, span.csi, &grid, mode)?;
        csi.index_axis_mut(Axis(0), n).assign(&resampled);
    }
    Ok(InterpolatedCsi { index: grid, csi })
}

/// Fill the holes of one span so it covers every subcarrier from its lowest
/// to its highest index.
pub fn interpolate_gaps(
    index: &[i32],
    csi: &Array3<Complex64>,
    mode: InterpolationMode,
) -> CsiResult<(Vec<i32>, Array3<Complex64>)> {
    let (Some(&lo), Some(&hi)) = (index.iter().min(), index.iter().max()) else {
        let (_, r, t) = csi.dim();
        return Ok((Vec::new(), Array3::zeros((0, r, t))));
    };
    let grid: Vec<i32> = (lo..=hi).collect();
    let out = resample(index, csi.view(), &grid, mode)?;
    Ok((grid, out))
}

fn resample(
    index: &[i32],
    csi: ArrayView3<'_, Complex64>,
    grid: &[i32],
    mode: InterpolationMode,
) -> CsiResult<Array3<Complex64>> {
    let (tones, nrx, ntx) = csi.dim();
    if index.len() != tones {
        return Err(CsiError::dimension("subcarrier index", index.len(), tones));
    }

    let mut order: Vec<usize> = (0..tones).collect();
    order.sort_by_key(|&k| index[k]);
    order.dedup_by_key(|k| index[*k]);
    let xs: Vec<f64> = order.iter().map(|&k| f64::from(index[k])).collect();
    let targets: Vec<f64> = grid.iter().map(|&g| f64::from(g)).collect();

    let mut out = Array3::zeros((grid.len(), nrx, ntx));
    for r in 0..nrx {
        for t in 0..ntx {
            let samples: Vec<Complex64> = order.iter().map(|&k| csi[[k, r, t]]).collect();
            let values = match mode {
                InterpolationMode::Iq => {
                    let re: Vec<f64> = samples.iter().map(|c| c.re).collect();
                    let im: Vec<f64> = samples.iter().map(|c| c.im).collect();
                    targets
                        .iter()
                        .map(|&x| Complex64::new(interp1(&xs, &re, x), interp1(&xs, &im, x)))
                        .collect::<Vec<_>>()
                }
                InterpolationMode::AmplitudePhase => {
                    let amp: Vec<f64> = samples.iter().map(|c| c.norm()).collect();
                    let mut phase: Vec<f64> = samples.iter().map(|c| c.arg()).collect();
                    unwrap_phase(&mut phase);
                    targets
                        .iter()
                        .map(|&x| Complex64::from_polar(interp1(&xs, &amp, x), interp1(&xs, &phase, x)))
                        .collect()
                }
            };
            for (g, value) in values.into_iter().enumerate() {
                out[[g, r, t]] = value;
            }
        }
    }
    Ok(out)
}

/// Piecewise-linear interpolation clamped to the edge values.
fn interp1(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let (Some(&first), Some(&last)) = (xs.first(), xs.last()) else {
        return 0.0;
    };
    if x <= first {
        return ys[0];
    }
    if x >= last {
        return ys[ys.len() - 1];
    }
    let hi = xs.partition_point(|&v| v <= x);
    let lo = hi - 1;
    if hi >= xs.len() {
        return ys[lo];
    }
    let w = (x - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + w * (ys[hi] - ys[lo])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intel_record(ntx: u8, value: Complex64) -> IntelRecord {
        IntelRecord {
            timestamp_low: 0,
            bfee_count: 0,
            nrx: 1,
            ntx,
            rssi_a: 30,
            rssi_b: 0,
            rssi_c: 0,
            noise: -127,
            agc: 0,
            antenna_sel: 0,
            perm: [0, 1, 2],
            rate: 0,
            mac: None,
            stp: None,
            csi: Array3::from_elem((30, 1, usize::from(ntx)), value),
            scale: CsiScale::Raw,
        }
    }

    fn expected_factor(nrx_ntx: f64) -> f64 {
        let rssi_pwr = 10f64.powf(-1.4);
        let csi_pwr_per_tone = nrx_ntx;
        let scale = rssi_pwr / csi_pwr_per_tone;
        (scale / (10f64.powf(-9.2) + scale * nrx_ntx)).sqrt()
    }

    #[test]
    fn test_total_rss_ignores_silent_chains() {
        let mut record = intel_record(1, Complex64::new(1.0, 0.0));
        assert_relative_eq!(total_rss(&record), -14.0, epsilon = 1e-9);

        record.rssi_b = 30;
        record.agc = 6;
        assert_relative_eq!(total_rss(&record), 30.0 + db(2.0) - 44.0 - 6.0, epsilon = 1e-9);

        record.rssi_a = 0;
        record.rssi_b = 0;
        assert!(total_rss(&record).is_infinite());
    }

    #[test]
    fn test_scaled_csi_single_stream() {
        let record = intel_record(1, Complex64::new(1.0, 0.0));
        let scaled = scaled_csi(&record);
        assert_relative_eq!(scaled[[0, 0, 0]].re, expected_factor(1.0), epsilon = 1e-12);
        assert_eq!(record.scale, CsiScale::Raw);
    }

    #[test]
    fn test_scaled_csi_two_streams_gain() {
        let record = intel_record(2, Complex64::new(1.0, 0.0));
        let scaled = scaled_csi(&record);
        let expected = expected_factor(2.0) * 2f64.sqrt();
        assert_relative_eq!(scaled[[5, 0, 1]].re, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_in_place_is_idempotent() {
        let mut record = intel_record(1, Complex64::new(3.0, -4.0));
        let once = scaled_csi_in_place(&mut record).clone();
        assert_eq!(record.scale, CsiScale::Scaled);
        let twice = scaled_csi_in_place(&mut record).clone();
        assert_eq!(once, twice);
        assert_eq!(scaled_csi(&record), once);
    }

    #[test]
    fn test_all_zero_csi_scales_to_zero() {
        let record = intel_record(1, Complex64::default());
        assert!(scaled_csi(&record).iter().all(|c| *c == Complex64::default()));
    }

    #[test]
    fn test_spatial_mapping_single_stream_is_identity() {
        let csi = Array3::from_shape_fn((30, 3, 1), |(s, r, _)| Complex64::new(s as f64, r as f64));
        assert_eq!(undo_spatial_mapping(&csi, 1, false).unwrap(), csi);
    }

    #[test]
    fn test_spatial_mapping_two_streams() {
        let h = 1.0 / 2f64.sqrt();
        let mut csi = Array3::zeros((1, 2, 2));
        csi[[0, 0, 0]] = Complex64::new(1.0, 0.0);
        csi[[0, 1, 1]] = Complex64::new(1.0, 0.0);

        let out = undo_spatial_mapping(&csi, 2, false).unwrap();
        assert_relative_eq!(out[[0, 0, 0]].re, h, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 0, 1]].re, h, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 1, 0]].re, h, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 1, 1]].re, -h, epsilon = 1e-12);

        let out = undo_spatial_mapping(&csi, 2, true).unwrap();
        assert_relative_eq!(out[[0, 0, 0]].re, h, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 0, 1]].im, -h, epsilon = 1e-12);
    }

    #[test]
    fn test_spatial_mapping_three_streams_preserves_power() {
        let csi = Array3::from_shape_fn((4, 2, 3), |(s, r, t)| {
            Complex64::new(s as f64 + 1.0, r as f64 - t as f64)
        });
        for is_40mhz in [false, true] {
            let out = undo_spatial_mapping(&csi, 3, is_40mhz).unwrap();
            assert_ne!(out, csi);
            for (a, b) in csi.lanes(Axis(2)).into_iter().zip(out.lanes(Axis(2))) {
                let pa: f64 = a.iter().map(|c| c.norm_sqr()).sum();
                let pb: f64 = b.iter().map(|c| c.norm_sqr()).sum();
                assert_relative_eq!(pa, pb, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_spatial_mapping_rejects_four_streams() {
        let csi = Array3::zeros((30, 3, 4));
        assert!(matches!(
            undo_spatial_mapping(&csi, 4, false),
            Err(CsiError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_scaled_sm_in_place_tracks_state() {
        let mut record = intel_record(2, Complex64::new(1.0, 1.0));
        let expected = scaled_csi_sm(&record).unwrap();
        let got = scaled_csi_sm_in_place(&mut record).unwrap().clone();
        assert_eq!(got, expected);
        assert_eq!(record.scale, CsiScale::ScaledSm);
        assert_eq!(scaled_csi_sm(&record).unwrap(), expected);
        assert_eq!(scaled_csi_sm_in_place(&mut record).unwrap(), &expected);
    }

    #[test]
    fn test_interpolate_gaps_iq() {
        let index = [-2, 0, 2];
        let csi = Array3::from_shape_vec(
            (3, 1, 1),
            vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(2.0, 4.0),
                Complex64::new(4.0, 0.0),
            ],
        )
        .unwrap();
        let (grid, out) = interpolate_gaps(&index, &csi, InterpolationMode::Iq).unwrap();
        assert_eq!(grid, vec![-2, -1, 0, 1, 2]);
        assert_eq!(out[[1, 0, 0]], Complex64::new(1.0, 2.0));
        assert_eq!(out[[3, 0, 0]], Complex64::new(3.0, 2.0));
        assert_eq!(out[[4, 0, 0]], Complex64::new(4.0, 0.0));
    }

    #[test]
    fn test_interpolate_amplitude_phase_follows_rotation() {
        // Constant amplitude with a phase ramp that wraps past π.
        let index: Vec<i32> = (0..8).map(|k| k * 2).collect();
        let csi = Array3::from_shape_fn((8, 1, 1), |(k, _, _)| {
            Complex64::from_polar(2.0, 0.9 * k as f64)
        });
        let (grid, out) = interpolate_gaps(&index, &csi, InterpolationMode::AmplitudePhase).unwrap();
        assert_eq!(grid.len(), 15);
        for (g, value) in out.iter().enumerate() {
            let expected = Complex64::from_polar(2.0, 0.45 * g as f64);
            assert_relative_eq!(value.re, expected.re, epsilon = 1e-9);
            assert_relative_eq!(value.im, expected.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_interpolate_csi_union_and_edges() {
        let a_index = [0, 2];
        let a = Array3::from_shape_vec((2, 1, 1), vec![Complex64::new(1.0, 0.0), Complex64::new(3.0, 0.0)])
            .unwrap();
        let b_index = [1, 4];
        let b = Array3::from_shape_vec((2, 1, 1), vec![Complex64::new(5.0, 0.0), Complex64::new(8.0, 0.0)])
            .unwrap();

        let spans = [CsiSpan::new(&a_index, a.view()), CsiSpan::new(&b_index, b.view())];
        let result = interpolate_csi(&spans, InterpolationMode::Iq).unwrap();
        assert_eq!(result.index, vec![0, 1, 2, 4]);
        assert_eq!(result.csi.shape(), &[2, 4, 1, 1]);

        let first: Vec<f64> = result.csi.index_axis(Axis(0), 0).iter().map(|c| c.re).collect();
        assert_eq!(first, vec![1.0, 2.0, 3.0, 3.0]);
        let second: Vec<f64> = result.csi.index_axis(Axis(0), 1).iter().map(|c| c.re).collect();
        assert_eq!(second, vec![5.0, 5.0, 6.0, 8.0]);
    }

    #[test]
    fn test_interpolate_csi_rejects_mixed_antennas() {
        let index = [0];
        let a = Array3::<Complex64>::zeros((1, 1, 1));
        let b = Array3::<Complex64>::zeros((1, 2, 1));
        let spans = [CsiSpan::new(&index, a.view()), CsiSpan::new(&index, b.view())];
        assert!(matches!(
            interpolate_csi(&spans, InterpolationMode::Iq),
            Err(CsiError::DimensionMismatch { .. })
        ));
    }
}
