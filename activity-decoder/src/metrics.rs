//! Derived-metric algorithms
//!
//! Column-independent building blocks: exponentially weighted smoothing, the
//! gap-aware elapsed time estimator, the modal sampling interval, elevation
//! gain/loss, normalized power, W' balance, rolling means over a regular time
//! grid, and great-circle distance and bearing.

use crate::types::duration_secs;
use chrono::Duration;
use std::collections::HashMap;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Exponentially weighted average
///
/// Causal and one-pass: the first value seeds the average and each following
/// value moves it by `alpha` of the difference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewa {
    alpha: f64,
    value: Option<f64>,
}

impl Ewa {
    /// Smoothing factor from a span: `alpha = 2 / (span + 1)`
    ///
    /// Spans below 1 are clamped to 1 (no smoothing).
    pub fn with_span(span: f64) -> Self {
        Self::with_alpha(2.0 / (span.max(1.0) + 1.0))
    }

    /// Smoothing factor from a halflife in samples: `alpha = 1 - 0.5^(1/halflife)`
    pub fn with_halflife(halflife: f64) -> Self {
        let halflife = halflife.max(f64::MIN_POSITIVE);
        Self::with_alpha(1.0 - (-std::f64::consts::LN_2 / halflife).exp())
    }

    /// Smoothing factor given directly, clamped to `(0, 1]`
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            value: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Current average, if any value has been seen
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Feed one value and return the updated average
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (x - prev),
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Iterator adapter yielding the running [`Ewa`] of its input
#[derive(Debug, Clone)]
pub struct Smoothed<I> {
    inner: I,
    ewa: Ewa,
}

impl<I: Iterator<Item = f64>> Iterator for Smoothed<I> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.inner.next().map(|x| self.ewa.update(x))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension trait adding `.smoothed(ewa)` to any `f64` iterator
pub trait SmoothExt: Iterator<Item = f64> + Sized {
    fn smoothed(self, ewa: Ewa) -> Smoothed<Self> {
        Smoothed { inner: self, ewa }
    }
}

impl<I: Iterator<Item = f64>> SmoothExt for I {}

/// Most common positive difference between consecutive instants
///
/// Ties go to the shorter interval. Returns `None` with fewer than two
/// increasing instants.
pub fn modal_interval(offsets: &[Duration]) -> Option<Duration> {
    let mut counts: HashMap<Duration, usize> = HashMap::new();
    for pair in offsets.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > Duration::zero() {
            *counts.entry(diff).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
        .map(|(diff, _)| diff)
}

/// Elapsed time minus every gap at or above `threshold`
///
/// `offsets` are instants measured from a common origin. Backward steps
/// (out-of-order rows) add nothing, so the result is never negative.
pub fn gap_aware_elapsed(offsets: &[Duration], threshold: Duration) -> Duration {
    offsets
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|step| *step > Duration::zero() && *step < threshold)
        .fold(Duration::zero(), |acc, step| acc + step)
}

/// Sum of positive steps between adjacent present values
pub fn ascent(values: &[Option<f64>]) -> f64 {
    steps(values).filter(|d| *d > 0.0).sum()
}

/// Sum of the magnitudes of negative steps between adjacent present values
pub fn descent(values: &[Option<f64>]) -> f64 {
    -steps(values).filter(|d| *d < 0.0).sum::<f64>()
}

/// Differences between adjacent rows where both values are present
fn steps(values: &[Option<f64>]) -> impl Iterator<Item = f64> + '_ {
    values.windows(2).filter_map(|pair| match (pair[0], pair[1]) {
        (Some(a), Some(b)) => Some(b - a),
        _ => None,
    })
}

/// Normalized power: 4th root of the mean 4th power of the smoothed series
///
/// Missing samples are skipped. Returns `None` when no sample is present.
pub fn normalized_power(values: &[Option<f64>], span: f64) -> Option<f64> {
    let (count, total) = values
        .iter()
        .flatten()
        .copied()
        .smoothed(Ewa::with_span(span))
        .fold((0usize, 0.0), |(n, sum), p| (n + 1, sum + p.powi(4)));
    if count == 0 {
        return None;
    }
    Some((total / count as f64).powf(0.25))
}

/// Number of samples covering `window_secs` at the given sampling interval
pub fn span_for_window(window_secs: f64, interval: Option<Duration>) -> f64 {
    let interval = interval.map(duration_secs).filter(|s| *s > 0.0).unwrap_or(1.0);
    (window_secs / interval).round().max(1.0)
}

/// Great-circle distance in meters between two points given in degrees
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing in degrees (0 = north, clockwise) from the first point to the second
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlambda = (lon2 - lon1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Bearing on arrival at the second point
pub fn final_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    (bearing(lat2, lon2, lat1, lon1) + 180.0) % 360.0
}

/// Rate of change of `numerator` per unit of `denominator` between adjacent rows
///
/// The first row, rows next to a missing value, and zero steps of the
/// denominator yield `None`.
pub fn step_ratio(numerator: &[Option<f64>], denominator: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(numerator.len());
    out.extend(numerator.first().map(|_| None));
    for i in 1..numerator.len().min(denominator.len()) {
        let ratio = match (numerator[i - 1], numerator[i], denominator[i - 1], denominator[i]) {
            (Some(n0), Some(n1), Some(d0), Some(d1)) if d1 != d0 => Some((n1 - n0) / (d1 - d0)),
            _ => None,
        };
        out.push(ratio);
    }
    out
}

/// Vertical ascent rate in m/s from altitude and row times
pub fn vam(altitude: &[Option<f64>], offsets: &[Duration]) -> Vec<Option<f64>> {
    let seconds: Vec<Option<f64>> = offsets.iter().map(|d| Some(duration_secs(*d))).collect();
    step_ratio(altitude, &seconds)
}

/// Gradient as a fraction (rise over run) from altitude and distance
pub fn gradient(altitude: &[Option<f64>], distance: &[Option<f64>]) -> Vec<Option<f64>> {
    step_ratio(altitude, distance)
}

/// Mean of each bin of width `step`, counted from offset zero
///
/// Bins with no present value are `None`; rows before offset zero are ignored.
pub fn resample(values: &[Option<f64>], offsets: &[Duration], step: Duration) -> Vec<Option<f64>> {
    let step = duration_secs(step);
    if step <= 0.0 {
        return Vec::new();
    }
    let mut bins: Vec<(usize, f64)> = Vec::new();
    for (value, offset) in values.iter().zip(offsets) {
        let secs = duration_secs(*offset);
        if secs < 0.0 {
            continue;
        }
        let bin = (secs / step).floor() as usize;
        if bins.len() <= bin {
            bins.resize(bin + 1, (0, 0.0));
        }
        if let Some(v) = value {
            bins[bin].0 += 1;
            bins[bin].1 += v;
        }
    }
    bins.into_iter()
        .map(|(count, sum)| (count > 0).then(|| sum / count as f64))
        .collect()
}

/// Trailing mean over full windows of `window` samples
///
/// Rows before the first full window, and windows containing a missing
/// value, are `None`.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).checked_sub(window)?;
            let slice = &values[start..=i];
            let sum = slice.iter().copied().sum::<Option<f64>>()?;
            Some(sum / window as f64)
        })
        .collect()
}

/// Best trailing mean over `window` samples
pub fn mean_max(values: &[Option<f64>], window: usize) -> Option<f64> {
    rolling_mean(values, window).into_iter().flatten().reduce(f64::max)
}

/// W' expended in kJ at each row, for critical power `cp` in watts
///
/// Power at a row applies to the interval up to the next row; a missing value
/// counts as 0 W. Above `cp` the work above it accumulates on top of the
/// current balance. At or below `cp` the level reached by the last effort
/// decays with time constant `546 e^(-0.01 (cp - p)) + 316` seconds. The
/// first row is 0.
pub fn wbalance(power: &[Option<f64>], offsets: &[Duration], cp: f64) -> Vec<f64> {
    let mut joules = Vec::with_capacity(power.len());
    if power.is_empty() {
        return joules;
    }
    joules.push(0.0);

    let mut to_recover = 0.0;
    let mut recovering_for = 0.0;
    let mut was_above = None;
    for (p, pair) in power.iter().zip(offsets.windows(2)) {
        let dt = duration_secs(pair[1] - pair[0]);
        let p = p.unwrap_or(0.0);
        let last = joules.last().copied().unwrap_or(0.0);
        if p > cp {
            let expended = last + dt * (p - cp);
            joules.push(expended);
            to_recover = expended;
            was_above = Some(true);
        } else {
            if was_above != Some(false) {
                recovering_for = 0.0;
            }
            recovering_for += dt;
            let tau = 546.0 * (-0.01 * (cp - p)).exp() + 316.0;
            joules.push(to_recover * (-recovering_for / tau).exp());
            was_above = Some(false);
        }
    }
    joules.into_iter().map(|j| j / 1000.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[i64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::seconds(*s)).collect()
    }

    #[test]
    fn test_ewa_constant_sequence() {
        let out: Vec<f64> = std::iter::repeat(7.5).take(50).smoothed(Ewa::with_span(30.0)).collect();
        assert_eq!(out.len(), 50);
        assert!(out.iter().all(|v| (*v - 7.5).abs() < 1e-12));
    }

    #[test]
    fn test_ewa_weights() {
        let mut ewa = Ewa::with_span(3.0);
        assert_eq!(ewa.alpha(), 0.5);
        assert_eq!(ewa.value(), None);
        assert_eq!(ewa.update(10.0), 10.0);
        assert_eq!(ewa.update(20.0), 15.0);
        assert_eq!(ewa.update(15.0), 15.0);
        ewa.reset();
        assert_eq!(ewa.update(4.0), 4.0);

        let half = Ewa::with_halflife(1.0);
        assert!((half.alpha() - 0.5).abs() < 1e-12);
        assert_eq!(Ewa::with_span(0.0).alpha(), 1.0);
    }

    #[test]
    fn test_ewa_is_causal() {
        let a: Vec<f64> = vec![1.0, 5.0, 2.0].into_iter().smoothed(Ewa::with_span(4.0)).collect();
        let b: Vec<f64> = vec![1.0, 5.0, 2.0, 100.0]
            .into_iter()
            .smoothed(Ewa::with_span(4.0))
            .collect();
        assert_eq!(a[..], b[..3]);
    }

    #[test]
    fn test_modal_interval() {
        assert_eq!(modal_interval(&secs(&[0, 1, 2, 3, 5])), Some(Duration::seconds(1)));
        // Tie between 1s and 2s goes to 1s
        assert_eq!(modal_interval(&secs(&[0, 2, 3])), Some(Duration::seconds(1)));
        assert_eq!(modal_interval(&secs(&[0])), None);
        assert_eq!(modal_interval(&secs(&[4, 4])), None);
    }

    #[test]
    fn test_gap_aware_elapsed_uniform() {
        let offsets = secs(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(
            gap_aware_elapsed(&offsets, Duration::seconds(2)),
            Duration::seconds(5)
        );
    }

    #[test]
    fn test_gap_aware_elapsed_with_pause() {
        let offsets = secs(&[0, 1, 2, 62, 63]);
        assert_eq!(
            gap_aware_elapsed(&offsets, Duration::seconds(2)),
            Duration::seconds(3)
        );
        // A gap exactly at the threshold counts as paused
        let offsets = secs(&[0, 1, 3]);
        assert_eq!(
            gap_aware_elapsed(&offsets, Duration::seconds(2)),
            Duration::seconds(1)
        );
        assert_eq!(gap_aware_elapsed(&[], Duration::seconds(2)), Duration::zero());
    }

    #[test]
    fn test_gap_aware_elapsed_out_of_order() {
        // The jump to 100 is a pause; the step back to 3 adds nothing
        let offsets = secs(&[0, 1, 2, 100, 3]);
        assert_eq!(
            gap_aware_elapsed(&offsets, Duration::seconds(2)),
            Duration::seconds(2)
        );
    }

    #[test]
    fn test_ascent_descent() {
        let up: Vec<Option<f64>> = [1.0, 2.0, 4.0, 7.0].iter().map(|v| Some(*v)).collect();
        assert_eq!(ascent(&up), 6.0);
        assert_eq!(descent(&up), 0.0);

        let down: Vec<Option<f64>> = up.iter().rev().copied().collect();
        assert_eq!(ascent(&down), 0.0);
        assert_eq!(descent(&down), 6.0);

        // A missing value breaks the pair on either side
        let gappy = vec![Some(0.0), Some(5.0), None, Some(20.0), Some(18.0)];
        assert_eq!(ascent(&gappy), 5.0);
        assert_eq!(descent(&gappy), 2.0);
    }

    #[test]
    fn test_normalized_power_constant() {
        let power = vec![Some(250.0); 120];
        let np = normalized_power(&power, 30.0).unwrap();
        assert!((np - 250.0).abs() < 1e-9);
        assert_eq!(normalized_power(&[None, None], 30.0), None);
    }

    #[test]
    fn test_normalized_power_exceeds_mean_for_variable_effort() {
        let power: Vec<Option<f64>> = (0..600)
            .map(|i| Some(if (i / 60) % 2 == 0 { 100.0 } else { 400.0 }))
            .collect();
        let np = normalized_power(&power, 30.0).unwrap();
        assert!(np > 250.0);
    }

    #[test]
    fn test_span_for_window() {
        assert_eq!(span_for_window(30.0, Some(Duration::seconds(1))), 30.0);
        assert_eq!(span_for_window(30.0, Some(Duration::seconds(4))), 8.0);
        assert_eq!(span_for_window(30.0, None), 30.0);
        assert_eq!(span_for_window(1.0, Some(Duration::seconds(10))), 1.0);
    }

    #[test]
    fn test_haversine() {
        assert_eq!(haversine(10.0, 20.0, 10.0, 20.0), 0.0);
        let d = haversine(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.93).abs() < 0.1, "distance was {}", d);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        assert!(bearing(0.0, 0.0, 1.0, 0.0).abs() < 1e-9);
        assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((bearing(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((bearing(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 1e-9);
        assert!((final_bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        // Heading east at 60N, a great circle bends back south
        assert!(final_bearing(60.0, 0.0, 60.0, 10.0) > bearing(60.0, 0.0, 60.0, 10.0));
    }

    #[test]
    fn test_vam_and_gradient() {
        let altitude = [Some(100.0), Some(102.0), None, Some(110.0), Some(111.0)];
        let offsets = secs(&[0, 4, 8, 12, 16]);
        assert_eq!(
            vam(&altitude, &offsets),
            vec![None, Some(0.5), None, None, Some(0.25)]
        );

        let distance = [Some(0.0), Some(20.0), Some(40.0), Some(40.0), Some(50.0)];
        assert_eq!(
            gradient(&altitude, &distance),
            vec![None, Some(0.1), None, None, Some(0.1)]
        );
        assert!(gradient(&[], &[]).is_empty());
    }

    #[test]
    fn test_resample_to_regular_grid() {
        let values = [Some(1.0), Some(3.0), Some(10.0), None, Some(7.0)];
        let offsets: Vec<Duration> = [0, 500, 1000, 2000, 4000]
            .iter()
            .map(|ms| Duration::milliseconds(*ms))
            .collect();
        assert_eq!(
            resample(&values, &offsets, Duration::seconds(1)),
            vec![Some(2.0), Some(10.0), None, None, Some(7.0)]
        );
        assert!(resample(&values, &offsets, Duration::zero()).is_empty());
    }

    #[test]
    fn test_rolling_mean_full_windows_only() {
        let values = [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(7.0)];
        assert_eq!(
            rolling_mean(&values, 2),
            vec![None, Some(1.5), Some(2.5), None, None, Some(6.0)]
        );
        assert_eq!(rolling_mean(&values, 0), values.to_vec());
        assert_eq!(mean_max(&values, 2), Some(6.0));
        assert_eq!(mean_max(&values, 10), None);
    }

    #[test]
    fn test_wbalance_depletes_and_recovers() {
        let power = [Some(300.0), Some(300.0), Some(100.0), Some(100.0), None, Some(250.0)];
        let offsets = secs(&[0, 1, 2, 3, 4, 5]);
        let expended = wbalance(&power, &offsets, 200.0);

        assert_eq!(expended.len(), 6);
        assert_eq!(&expended[..3], &[0.0, 0.1, 0.2]);
        let tau = 546.0 * (-1.0f64).exp() + 316.0;
        assert!((expended[3] - 0.2 * (-1.0 / tau).exp()).abs() < 1e-12);
        assert!(expended[4] < expended[3]);
        // Missing power recovers at 0 W, the fastest rate
        let tau_zero = 546.0 * (-2.0f64).exp() + 316.0;
        assert!((expended[5] - 0.2 * (-3.0 / tau_zero).exp()).abs() < 1e-12);
        assert!(wbalance(&[], &[], 200.0).is_empty());
    }

    #[test]
    fn test_wbalance_below_cp_from_the_start() {
        let power = [Some(150.0); 4];
        let offsets = secs(&[0, 1, 2, 3]);
        assert_eq!(wbalance(&power, &offsets, 200.0), vec![0.0; 4]);
    }
}
