//! VOC index computation for SGP40 raw signals.
//!
//! The algorithm turns the raw, drifting MOX signal into an index between 1 and 500 where 100
//! is the average air quality of the last few hours. It runs in three stages:
//!
//! 1. A mean/variance estimator tracks the sensor baseline. Its learning rate starts high,
//!    decays over the first hours of operation, and is gated off while the index is high so
//!    that a long VOC event is not learned as the new baseline.
//! 2. A MOX model maps the deviation from the baseline into index space, and a scaled sigmoid
//!    bounds it.
//! 3. An adaptive low-pass filter smooths the result, reacting quickly to large changes and
//!    slowly to small ones.
//!
//! All state lives in [`VocAlgorithm`], which the caller owns. [`VocAlgorithm::process`] must
//! be called once per second.

use super::fix16::Fix16;

const fn f16(value: f64) -> Fix16 {
    Fix16::from_f64(value)
}

const SAMPLING_INTERVAL: f64 = 1.0;
const INITIAL_BLACKOUT: f64 = 45.0;
const VOC_INDEX_GAIN: f64 = 230.0;
const SRAW_STD_INITIAL: f64 = 50.0;
const SRAW_STD_BONUS: f64 = 220.0;
const TAU_MEAN_VARIANCE_HOURS: f64 = 12.0;
const TAU_INITIAL_MEAN: f64 = 20.0;
const INIT_DURATION_MEAN: f64 = 3600.0 * 0.75;
const INIT_TRANSITION_MEAN: f64 = 0.01;
const TAU_INITIAL_VARIANCE: f64 = 2500.0;
const INIT_DURATION_VARIANCE: f64 = 3600.0 * 1.45;
const INIT_TRANSITION_VARIANCE: f64 = 0.01;
const GATING_THRESHOLD: f64 = 340.0;
const GATING_THRESHOLD_INITIAL: f64 = 510.0;
const GATING_THRESHOLD_TRANSITION: f64 = 0.09;
const GATING_MAX_DURATION_MINUTES: f64 = 60.0 * 3.0;
const GATING_MAX_RATIO: f64 = 0.3;
const SIGMOID_L: f64 = 500.0;
const SIGMOID_K: f64 = -0.0065;
const SIGMOID_X0: f64 = 213.0;
const VOC_INDEX_OFFSET_DEFAULT: f64 = 100.0;
const LP_TAU_FAST: f64 = 20.0;
const LP_TAU_SLOW: f64 = 500.0;
const LP_ALPHA: f64 = -0.2;
const PERSISTENCE_UPTIME_GAMMA: f64 = 3.0 * 3600.0;
const GAMMA_SCALING: f64 = 64.0;
const FIX16_MAX: f64 = 32767.0;

/// Lowest raw signal fed to the model; lower readings are clamped.
pub const SRAW_MIN: i32 = 20_001;

/// Highest raw signal fed to the model; higher readings are clamped.
pub const SRAW_MAX: i32 = 52_767;

/// A logistic curve `l / (1 + e^(k * (x - x0)))`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
struct Sigmoid {
    l: Fix16,
    k: Fix16,
    x0: Fix16,
}

impl Sigmoid {
    const fn new(l: Fix16, x0: Fix16, k: Fix16) -> Self {
        Self { l, k, x0 }
    }

    fn process(&self, sample: Fix16) -> Fix16 {
        let x = self.k * (sample - self.x0);
        if x < f16(-50.0) {
            self.l
        } else if x > f16(50.0) {
            Fix16::ZERO
        } else {
            self.l / (Fix16::ONE + x.exp())
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct MeanVarianceEstimator {
    gating_max_duration_minutes: Fix16,
    initialized: bool,
    mean: Fix16,
    sraw_offset: Fix16,
    std: Fix16,
    gamma: Fix16,
    gamma_initial_mean: Fix16,
    gamma_initial_variance: Fix16,
    gamma_mean: Fix16,
    gamma_variance: Fix16,
    uptime_gamma: Fix16,
    uptime_gating: Fix16,
    gating_duration_minutes: Fix16,
}

impl MeanVarianceEstimator {
    fn new(
        std_initial: Fix16,
        tau_mean_variance_hours: Fix16,
        gating_max_duration_minutes: Fix16,
    ) -> Self {
        let interval_hours = f16(SAMPLING_INTERVAL / 3600.0);
        Self {
            gating_max_duration_minutes,
            initialized: false,
            mean: Fix16::ZERO,
            sraw_offset: Fix16::ZERO,
            std: std_initial,
            gamma: f16(GAMMA_SCALING * (SAMPLING_INTERVAL / 3600.0))
                / (tau_mean_variance_hours + interval_hours),
            gamma_initial_mean: f16(
                (GAMMA_SCALING * SAMPLING_INTERVAL) / (TAU_INITIAL_MEAN + SAMPLING_INTERVAL),
            ),
            gamma_initial_variance: f16(
                (GAMMA_SCALING * SAMPLING_INTERVAL) / (TAU_INITIAL_VARIANCE + SAMPLING_INTERVAL),
            ),
            gamma_mean: Fix16::ZERO,
            gamma_variance: Fix16::ZERO,
            uptime_gamma: Fix16::ZERO,
            uptime_gating: Fix16::ZERO,
            gating_duration_minutes: Fix16::ZERO,
        }
    }

    const fn set_states(&mut self, mean: Fix16, std: Fix16, uptime_gamma: Fix16) {
        self.mean = mean;
        self.std = std;
        self.uptime_gamma = uptime_gamma;
        self.initialized = true;
    }

    const fn std(&self) -> Fix16 {
        self.std
    }

    fn mean(&self) -> Fix16 {
        self.mean + self.sraw_offset
    }

    fn calculate_gamma(&mut self, voc_index_from_prior: Fix16) {
        let uptime_limit = f16(FIX16_MAX - SAMPLING_INTERVAL);
        if self.uptime_gamma < uptime_limit {
            self.uptime_gamma += f16(SAMPLING_INTERVAL);
        }
        if self.uptime_gating < uptime_limit {
            self.uptime_gating += f16(SAMPLING_INTERVAL);
        }

        let mean_warmup = Sigmoid::new(
            Fix16::ONE,
            f16(INIT_DURATION_MEAN),
            f16(INIT_TRANSITION_MEAN),
        );
        let variance_warmup = Sigmoid::new(
            Fix16::ONE,
            f16(INIT_DURATION_VARIANCE),
            f16(INIT_TRANSITION_VARIANCE),
        );

        let sigmoid_gamma_mean = mean_warmup.process(self.uptime_gamma);
        let gamma_mean =
            self.gamma + (self.gamma_initial_mean - self.gamma) * sigmoid_gamma_mean;
        let sigmoid_gating_mean = Self::gating(mean_warmup.process(self.uptime_gating))
            .process(voc_index_from_prior);
        self.gamma_mean = sigmoid_gating_mean * gamma_mean;

        let sigmoid_gamma_variance = variance_warmup.process(self.uptime_gamma);
        let gamma_variance = self.gamma
            + (self.gamma_initial_variance - self.gamma)
                * (sigmoid_gamma_variance - sigmoid_gamma_mean);
        let sigmoid_gating_variance = Self::gating(variance_warmup.process(self.uptime_gating))
            .process(voc_index_from_prior);
        self.gamma_variance = sigmoid_gating_variance * gamma_variance;

        self.gating_duration_minutes += f16(SAMPLING_INTERVAL / 60.0)
            * ((Fix16::ONE - sigmoid_gating_mean) * f16(1.0 + GATING_MAX_RATIO)
                - f16(GATING_MAX_RATIO));
        if self.gating_duration_minutes < Fix16::ZERO {
            self.gating_duration_minutes = Fix16::ZERO;
        }
        if self.gating_duration_minutes > self.gating_max_duration_minutes {
            self.uptime_gating = Fix16::ZERO;
        }
    }

    /// Learning is gated off above an index threshold that starts high and relaxes as the
    /// warm-up sigmoid falls.
    fn gating(warmup: Fix16) -> Sigmoid {
        let threshold = f16(GATING_THRESHOLD)
            + f16(GATING_THRESHOLD_INITIAL - GATING_THRESHOLD) * warmup;
        Sigmoid::new(Fix16::ONE, threshold, f16(GATING_THRESHOLD_TRANSITION))
    }

    fn process(&mut self, sraw: Fix16, voc_index_from_prior: Fix16) {
        if !self.initialized {
            self.initialized = true;
            self.sraw_offset = sraw;
            self.mean = Fix16::ZERO;
            return;
        }

        if self.mean >= f16(100.0) || self.mean <= f16(-100.0) {
            self.sraw_offset += self.mean;
            self.mean = Fix16::ZERO;
        }

        let sraw = sraw - self.sraw_offset;
        self.calculate_gamma(voc_index_from_prior);

        let scaling = f16(GAMMA_SCALING);
        let delta = (sraw - self.mean) / scaling;
        let c = self.std + delta.abs();
        let additional_scaling = if c > f16(1440.0) {
            f16(4.0)
        } else {
            Fix16::ONE
        };

        self.std = (additional_scaling * (scaling - self.gamma_variance)).sqrt()
            * (self.std * (self.std / (scaling * additional_scaling))
                + (self.gamma_variance * delta) / additional_scaling * delta)
                .sqrt();
        self.mean += self.gamma_mean * delta;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AdaptiveLowpass {
    a1: Fix16,
    a2: Fix16,
    state: Option<[Fix16; 3]>,
}

impl AdaptiveLowpass {
    const fn new() -> Self {
        Self {
            a1: f16(SAMPLING_INTERVAL / (LP_TAU_FAST + SAMPLING_INTERVAL)),
            a2: f16(SAMPLING_INTERVAL / (LP_TAU_SLOW + SAMPLING_INTERVAL)),
            state: None,
        }
    }

    fn process(&mut self, sample: Fix16) -> Fix16 {
        let [mut x1, mut x2, mut x3] = self.state.unwrap_or([sample; 3]);

        x1 = (Fix16::ONE - self.a1) * x1 + self.a1 * sample;
        x2 = (Fix16::ONE - self.a2) * x2 + self.a2 * sample;

        let abs_delta = (x1 - x2).abs();
        let f1 = (f16(LP_ALPHA) * abs_delta).exp();
        let tau_a = f16(LP_TAU_SLOW - LP_TAU_FAST) * f1 + f16(LP_TAU_FAST);
        let a3 = f16(SAMPLING_INTERVAL) / (f16(SAMPLING_INTERVAL) + tau_a);
        x3 = (Fix16::ONE - a3) * x3 + a3 * sample;

        self.state = Some([x1, x2, x3]);
        x3
    }
}

/// State of the VOC index algorithm for one sensor.
///
/// # Examples
///
/// ```
/// use clickboard_drivers::sensor::environment2::VocAlgorithm;
///
/// let mut voc = VocAlgorithm::new();
/// // The first 45 seconds after start-up are a blackout period.
/// assert_eq!(voc.process(30_000), 0);
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct VocAlgorithm {
    voc_index_offset: Fix16,
    tau_mean_variance_hours: Fix16,
    gating_max_duration_minutes: Fix16,
    sraw_std_initial: Fix16,
    uptime: Fix16,
    sraw: Fix16,
    voc_index: Fix16,
    estimator: MeanVarianceEstimator,
    mox_std: Fix16,
    mox_mean: Fix16,
    sigmoid_offset: Fix16,
    lowpass: AdaptiveLowpass,
}

impl VocAlgorithm {
    /// Creates an algorithm instance with the default tuning.
    #[must_use]
    pub fn new() -> Self {
        let mut algorithm = Self {
            voc_index_offset: f16(VOC_INDEX_OFFSET_DEFAULT),
            tau_mean_variance_hours: f16(TAU_MEAN_VARIANCE_HOURS),
            gating_max_duration_minutes: f16(GATING_MAX_DURATION_MINUTES),
            sraw_std_initial: f16(SRAW_STD_INITIAL),
            uptime: Fix16::ZERO,
            sraw: Fix16::ZERO,
            voc_index: Fix16::ZERO,
            estimator: MeanVarianceEstimator::new(
                f16(SRAW_STD_INITIAL),
                f16(TAU_MEAN_VARIANCE_HOURS),
                f16(GATING_MAX_DURATION_MINUTES),
            ),
            mox_std: Fix16::ZERO,
            mox_mean: Fix16::ZERO,
            sigmoid_offset: Fix16::ZERO,
            lowpass: AdaptiveLowpass::new(),
        };
        algorithm.init_instances();
        algorithm
    }

    /// Restarts the algorithm, keeping the tuning parameters.
    pub fn reset(&mut self) {
        self.uptime = Fix16::ZERO;
        self.sraw = Fix16::ZERO;
        self.voc_index = Fix16::ZERO;
        self.init_instances();
    }

    /// Changes the tuning parameters and restarts the learning process.
    ///
    /// - `voc_index_offset`: index reported for average conditions (default 100).
    /// - `learning_time_hours`: time constant of the baseline estimate (default 12).
    /// - `gating_max_duration_minutes`: longest stretch the baseline may be frozen during a
    ///   high-VOC event (default 180).
    /// - `std_initial`: initial estimate of the signal's standard deviation (default 50).
    pub fn set_tuning_parameters(
        &mut self,
        voc_index_offset: i32,
        learning_time_hours: i32,
        gating_max_duration_minutes: i32,
        std_initial: i32,
    ) {
        self.voc_index_offset = Fix16::from_int(voc_index_offset);
        self.tau_mean_variance_hours = Fix16::from_int(learning_time_hours);
        self.gating_max_duration_minutes = Fix16::from_int(gating_max_duration_minutes);
        self.sraw_std_initial = Fix16::from_int(std_initial);
        self.init_instances();
    }

    /// Returns the learned baseline as `(mean, std)` in raw Q16.16 form.
    ///
    /// Store these and pass them to [`VocAlgorithm::set_states`] after a short power cycle to
    /// skip the initial learning phase.
    #[must_use]
    pub fn states(&self) -> (i32, i32) {
        (self.estimator.mean().0, self.estimator.std().0)
    }

    /// Restores a baseline previously read with [`VocAlgorithm::states`].
    pub fn set_states(&mut self, mean: i32, std: i32) {
        self.estimator
            .set_states(Fix16(mean), Fix16(std), f16(PERSISTENCE_UPTIME_GAMMA));
        self.sraw = Fix16(mean);
    }

    /// Feeds one raw signal sample and returns the VOC index.
    ///
    /// Returns 0 during the 45 second start-up blackout, and a value between 1 and 500
    /// afterwards. A sample of 0, or of 65000 and above, is ignored and the previous sample
    /// is used again; others are clamped to [`SRAW_MIN`]`..=`[`SRAW_MAX`].
    pub fn process(&mut self, sraw: u16) -> i32 {
        let sraw = i32::from(sraw);

        if self.uptime <= f16(INITIAL_BLACKOUT) {
            self.uptime += f16(SAMPLING_INTERVAL);
        } else {
            if sraw > 0 && sraw < 65_000 {
                self.sraw = Fix16::from_int(sraw.clamp(SRAW_MIN, SRAW_MAX) - 20_000);
            }

            let index = self.mox_process(self.sraw);
            let index = self.sigmoid_scaled_process(index);
            let index = self.lowpass.process(index);
            self.voc_index = index.max(f16(0.5));

            if self.sraw > Fix16::ZERO {
                self.estimator.process(self.sraw, self.voc_index);
                self.mox_std = self.estimator.std();
                self.mox_mean = self.estimator.mean();
            }
        }

        (self.voc_index + f16(0.5)).to_int()
    }

    fn init_instances(&mut self) {
        self.estimator = MeanVarianceEstimator::new(
            self.sraw_std_initial,
            self.tau_mean_variance_hours,
            self.gating_max_duration_minutes,
        );
        self.mox_std = self.estimator.std();
        self.mox_mean = self.estimator.mean();
        self.sigmoid_offset = self.voc_index_offset;
        self.lowpass = AdaptiveLowpass::new();
    }

    fn mox_process(&self, sraw: Fix16) -> Fix16 {
        (sraw - self.mox_mean) / -(self.mox_std + f16(SRAW_STD_BONUS)) * f16(VOC_INDEX_GAIN)
    }

    fn sigmoid_scaled_process(&self, sample: Fix16) -> Fix16 {
        let x = f16(SIGMOID_K) * (sample - f16(SIGMOID_X0));
        if x < f16(-50.0) {
            return f16(SIGMOID_L);
        }
        if x > f16(50.0) {
            return Fix16::ZERO;
        }

        if sample >= Fix16::ZERO {
            let shift = (f16(SIGMOID_L) - f16(5.0) * self.sigmoid_offset) / f16(4.0);
            (f16(SIGMOID_L) + shift) / (Fix16::ONE + x.exp()) - shift
        } else {
            self.sigmoid_offset / f16(VOC_INDEX_OFFSET_DEFAULT)
                * (f16(SIGMOID_L) / (Fix16::ONE + x.exp()))
        }
    }
}

impl Default for VocAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settle(voc: &mut VocAlgorithm, sraw: u16, seconds: usize) -> i32 {
        let mut index = 0;
        for _ in 0..seconds {
            index = voc.process(sraw);
        }
        index
    }

    #[test]
    fn blackout_reports_zero() {
        let mut voc = VocAlgorithm::new();
        for _ in 0..45 {
            assert_eq!(voc.process(30_000), 0);
        }
    }

    #[test]
    fn index_is_positive_after_blackout() {
        let mut voc = VocAlgorithm::new();
        settle(&mut voc, 30_000, 46);
        for _ in 0..20 {
            let index = voc.process(30_000);
            assert!((1..=500).contains(&index), "index {index}");
        }
    }

    #[test]
    fn out_of_range_samples_repeat_the_previous_one() {
        let mut skipped = VocAlgorithm::new();
        let mut repeated = VocAlgorithm::new();
        settle(&mut skipped, 30_000, 60);
        settle(&mut repeated, 30_000, 60);

        assert_eq!(skipped.process(0), repeated.process(30_000));
        assert_eq!(skipped.process(65_000), repeated.process(30_000));
    }

    #[test]
    fn steady_air_settles_at_offset() {
        let mut voc = VocAlgorithm::new();
        let index = settle(&mut voc, 30_000, 1_000);
        assert!((95..=105).contains(&index), "index {index}");
    }

    #[test]
    fn falling_signal_raises_index() {
        let mut voc = VocAlgorithm::new();
        let baseline = settle(&mut voc, 30_000, 1_000);
        let event = settle(&mut voc, 29_000, 10);
        assert!(event > baseline + 50, "baseline {baseline}, event {event}");
    }

    #[test]
    fn states_round_trip() {
        let mut voc = VocAlgorithm::new();
        settle(&mut voc, 30_000, 200);
        let (mean, std) = voc.states();
        assert_eq!(mean, Fix16::from_int(10_000).0);

        let mut restored = VocAlgorithm::new();
        restored.set_states(mean, std);
        assert_eq!(restored.states(), (mean, std));
    }

    #[test]
    fn tuning_changes_offset() {
        let mut voc = VocAlgorithm::new();
        voc.set_tuning_parameters(250, 12, 180, 50);
        let index = settle(&mut voc, 30_000, 1_000);
        assert!((240..=260).contains(&index), "index {index}");
    }
}
