//! Clock and period synthesis for PWM outputs.
//!
//! A PWM channel's output frequency is `source / divider / period`. The
//! period is private to the channel, the divider is shared by every channel
//! on the same clock. [`plan_frequency`] first tries to reach the target with
//! the period alone and only moves the shared divider when that misses the
//! tolerance. Everything here is pure; the session applies the plan.

use serde::{Deserialize, Serialize};

use crate::topology::MAX_DIVIDER;

/// Largest period used when deriving the lowest reachable frequency.
const BAND_MAX_PERIOD: f64 = 65_534.0;

/// Bounds applied to every plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisLimits {
    /// Smallest period ever written.
    pub min_period: u32,
    /// Largest acceptable error, in percent of the target.
    pub tolerance_percent: f64,
}

impl Default for SynthesisLimits {
    fn default() -> Self {
        Self {
            min_period: 10,
            tolerance_percent: 5.0,
        }
    }
}

/// The shared clock a channel runs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    pub source_hz: u32,
    pub divider: u32,
}

impl ClockState {
    pub fn frequency_hz(&self) -> f64 {
        f64::from(self.source_hz) / f64::from(self.divider.max(1))
    }

    /// Slowest clock any divider can produce.
    pub fn min_clock_hz(&self) -> f64 {
        f64::from(self.source_hz / MAX_DIVIDER + 1)
    }

    /// Target frequencies this clock can produce with any divider.
    pub fn band(&self, limits: &SynthesisLimits) -> (f64, f64) {
        let low = self.min_clock_hz() / BAND_MAX_PERIOD;
        let high = f64::from(self.source_hz) / f64::from(limits.min_period.max(1));
        (low, high)
    }
}

/// What the caller wants from one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRequest {
    pub target_hz: f64,
    /// Fraction of the period spent active, preserved across the change.
    pub duty_cycle: f64,
    /// Largest period the channel's counter holds.
    pub max_count: u32,
}

/// One divider/period pair and how close it lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub divider: u32,
    pub period: u32,
    pub compare: u32,
    pub achieved_hz: f64,
    pub error_percent: f64,
}

/// Result of planning a frequency change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPlan {
    pub requested_hz: f64,
    /// Target after clamping into the reachable band.
    pub target_hz: f64,
    pub clamped: bool,
    pub divider: u32,
    /// True when the shared clock divider must change.
    pub divider_changed: bool,
    pub period: u32,
    pub compare: u32,
    pub achieved_hz: f64,
    pub error_percent: f64,
    pub within_tolerance: bool,
}

/// Period and compare for a fixed divider.
pub fn evaluate(
    source_hz: u32,
    divider: u32,
    target_hz: f64,
    duty_cycle: f64,
    max_count: u32,
    limits: &SynthesisLimits,
) -> Candidate {
    let divider = divider.clamp(1, MAX_DIVIDER);
    let clock = f64::from(source_hz) / f64::from(divider);
    let floor = limits.min_period.min(max_count);
    let period = (clock / target_hz)
        .round()
        .clamp(f64::from(floor), f64::from(max_count)) as u32;
    let period = period.max(1);
    let compare = duty_compare(period, duty_cycle);
    let achieved_hz = clock / f64::from(period);
    Candidate {
        divider,
        period,
        compare,
        achieved_hz,
        error_percent: (achieved_hz - target_hz).abs() / target_hz * 100.0,
    }
}

/// Compare value giving `duty_cycle` of `period`.
pub fn duty_compare(period: u32, duty_cycle: f64) -> u32 {
    let duty = if duty_cycle.is_nan() {
        0.0
    } else {
        duty_cycle.clamp(0.0, 1.0)
    };
    ((f64::from(period) * duty).round() as u32).min(period)
}

/// Plan period, compare and (if needed) a new shared divider for a target.
///
/// Returns `None` when the clock has no usable source frequency. A target
/// outside the clock's band is clamped into it. When no divider reaches the
/// tolerance, the closest candidate found is returned with
/// `within_tolerance == false`.
pub fn plan_frequency(
    clock: ClockState,
    request: FrequencyRequest,
    limits: &SynthesisLimits,
) -> Option<FrequencyPlan> {
    if clock.source_hz == 0 || request.max_count == 0 {
        return None;
    }
    let (low, high) = clock.band(limits);
    let target = if request.target_hz.is_nan() {
        low
    } else {
        request.target_hz.clamp(low, high)
    };
    let eval = |divider: u32| {
        evaluate(
            clock.source_hz,
            divider,
            target,
            request.duty_cycle,
            request.max_count,
            limits,
        )
    };
    let tolerable = |c: &Candidate| c.error_percent <= limits.tolerance_percent;

    let mut best = eval(clock.divider);
    if !tolerable(&best) {
        best = search_divider(clock, target, request.max_count, &best, eval, tolerable);
    }

    Some(FrequencyPlan {
        requested_hz: request.target_hz,
        target_hz: target,
        clamped: target != request.target_hz,
        divider: best.divider,
        divider_changed: best.divider != clock.divider,
        period: best.period,
        compare: best.compare,
        achieved_hz: best.achieved_hz,
        error_percent: best.error_percent,
        within_tolerance: tolerable(&best),
    })
}

impl FrequencyPlan {
    /// Re-evaluate this plan on the divider the controller actually applied.
    ///
    /// `clock` is the state before the change. The target stays the same;
    /// period, compare and tolerance are recomputed for `applied`.
    pub fn with_divider(
        self,
        clock: ClockState,
        applied: u32,
        request: &FrequencyRequest,
        limits: &SynthesisLimits,
    ) -> Self {
        let best = evaluate(
            clock.source_hz,
            applied,
            self.target_hz,
            request.duty_cycle,
            request.max_count,
            limits,
        );
        Self {
            divider: best.divider,
            divider_changed: best.divider != clock.divider,
            period: best.period,
            compare: best.compare,
            achieved_hz: best.achieved_hz,
            error_percent: best.error_percent,
            within_tolerance: best.error_percent <= limits.tolerance_percent,
            ..self
        }
    }
}

fn search_divider(
    clock: ClockState,
    target: f64,
    max_count: u32,
    start: &Candidate,
    eval: impl Fn(u32) -> Candidate,
    tolerable: impl Fn(&Candidate) -> bool,
) -> Candidate {
    let source = f64::from(clock.source_hz);
    let wanted_clock = (target * f64::from(max_count)).clamp(clock.min_clock_hz(), source);
    let mut divider = (source / wanted_clock)
        .round()
        .clamp(1.0, f64::from(MAX_DIVIDER)) as u32;

    let mut best = *start;
    let mut last_step: Option<bool> = None;
    loop {
        let candidate = eval(divider);
        if candidate.error_percent < best.error_percent {
            best = candidate;
        }
        if tolerable(&candidate) {
            break;
        }
        // Too fast means a slower clock, i.e. a larger divider.
        let step_up = candidate.achieved_hz > target;
        // A reversed step means the error minimum lies behind us.
        if last_step.is_some_and(|previous| previous != step_up) {
            break;
        }
        last_step = Some(step_up);
        let next = if step_up {
            divider.checked_add(1).filter(|d| *d <= MAX_DIVIDER)
        } else {
            divider.checked_sub(1).filter(|d| *d >= 1)
        };
        match next {
            Some(next) => divider = next,
            None => break,
        }
    }
    best
}

/// One register write during a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmWrite {
    Period(u32),
    Compare(u32),
}

/// Order the writes moving a channel from `current` to `next`.
///
/// Both are `(period, compare)`. Compare never exceeds period on the wire
/// between the two writes. Unchanged values are not written.
pub fn commit_order(current: (u32, u32), next: (u32, u32)) -> Vec<PwmWrite> {
    let (current_period, current_compare) = current;
    let (period, compare) = next;
    let writes = if current_compare > period {
        [PwmWrite::Compare(compare), PwmWrite::Period(period)]
    } else {
        [PwmWrite::Period(period), PwmWrite::Compare(compare)]
    };
    writes
        .into_iter()
        .filter(|write| match *write {
            PwmWrite::Period(p) => p != current_period,
            PwmWrite::Compare(c) => c != current_compare,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const PLL: u32 = 24_000_000;

    fn request(target_hz: f64, duty_cycle: f64, max_count: u32) -> FrequencyRequest {
        FrequencyRequest {
            target_hz,
            duty_cycle,
            max_count,
        }
    }

    #[test]
    fn fifty_hertz_from_pll_lowers_the_clock() {
        let clock = ClockState {
            source_hz: PLL,
            divider: 1,
        };
        let plan = plan_frequency(clock, request(50.0, 0.5, 65_535), &SynthesisLimits::default())
            .unwrap();
        assert!(plan.divider_changed);
        assert_eq!(plan.divider, 7);
        assert_eq!(plan.period, 65_535);
        assert!(plan.within_tolerance);
        assert!((plan.achieved_hz - 50.0).abs() / 50.0 <= 0.05);
        assert!(plan.error_percent > 4.0 && plan.error_percent < 5.0);
        assert_eq!(plan.compare, 32_768);
    }

    #[test]
    fn plan_follows_the_divider_actually_applied() {
        let clock = ClockState {
            source_hz: PLL,
            divider: 1,
        };
        let limits = SynthesisLimits::default();
        let wanted = request(50.0, 0.5, 65_535);
        let plan = plan_frequency(clock, wanted, &limits).unwrap();

        // Divider write rejected: the clock stayed at 24 MHz.
        let kept = plan.with_divider(clock, 1, &wanted, &limits);
        assert!(!kept.divider_changed);
        assert_eq!((kept.divider, kept.period, kept.compare), (1, 65_535, 32_768));
        assert!((kept.achieved_hz - 366.2).abs() < 0.1);
        assert!(!kept.within_tolerance);
        assert_eq!(kept.target_hz, plan.target_hz);

        // Controller picked 8 instead of 7.
        let other = plan.with_divider(clock, 8, &wanted, &limits);
        assert!(other.divider_changed);
        assert_eq!((other.divider, other.period, other.compare), (8, 60_000, 30_000));
        assert_eq!(other.error_percent, 0.0);
        assert!(other.within_tolerance);
    }

    #[test]
    fn reachable_target_keeps_the_divider() {
        let clock = ClockState {
            source_hz: PLL,
            divider: 24,
        };
        let plan = plan_frequency(clock, request(1_000.0, 0.25, 65_535), &SynthesisLimits::default())
            .unwrap();
        assert!(!plan.divider_changed);
        assert_eq!(plan.period, 1_000);
        assert_eq!(plan.compare, 250);
        assert_eq!(plan.error_percent, 0.0);
    }

    #[test]
    fn out_of_band_target_is_clamped() {
        let clock = ClockState {
            source_hz: PLL,
            divider: 1,
        };
        let limits = SynthesisLimits::default();
        let plan = plan_frequency(clock, request(10e6, 0.5, 65_535), &limits).unwrap();
        assert!(plan.clamped);
        assert_eq!(plan.target_hz, 2_400_000.0);
        assert_eq!(plan.period, 10);

        let plan = plan_frequency(clock, request(0.0, 0.5, 65_535), &limits).unwrap();
        assert!(plan.clamped);
        assert!(plan.target_hz > 0.0);
    }

    #[test]
    fn unreachable_tolerance_returns_best_effort() {
        // An 8-bit counter cannot get near 1 Hz from a 24 MHz source.
        let clock = ClockState {
            source_hz: PLL,
            divider: 1,
        };
        let plan = plan_frequency(clock, request(1.0, 0.5, 255), &SynthesisLimits::default())
            .unwrap();
        assert!(!plan.within_tolerance);
        assert_eq!(plan.divider, MAX_DIVIDER);
        assert_eq!(plan.period, 255);
    }

    #[test]
    fn zero_source_cannot_be_planned() {
        let clock = ClockState {
            source_hz: 0,
            divider: 1,
        };
        assert!(plan_frequency(clock, request(50.0, 0.5, 255), &SynthesisLimits::default()).is_none());
    }

    #[test]
    fn shrinking_below_compare_writes_compare_first() {
        assert_eq!(
            commit_order((1_000, 800), (500, 400)),
            vec![PwmWrite::Compare(400), PwmWrite::Period(500)]
        );
        assert_eq!(
            commit_order((500, 400), (1_000, 800)),
            vec![PwmWrite::Period(1_000), PwmWrite::Compare(800)]
        );
        assert!(commit_order((500, 250), (500, 250)).is_empty());
        assert_eq!(commit_order((500, 250), (500, 100)), vec![PwmWrite::Compare(100)]);
    }

    proptest! {
        #[test]
        fn duty_cycle_is_preserved(
            target in 1.0f64..100_000.0,
            duty in 0.0f64..=1.0,
            divider in 1u32..=1_000,
            wide in any::<bool>(),
        ) {
            let max_count = if wide { 65_535 } else { 255 };
            let clock = ClockState { source_hz: PLL, divider };
            let plan = plan_frequency(clock, request(target, duty, max_count), &SynthesisLimits::default())
                .unwrap();
            prop_assert!(plan.compare <= plan.period);
            let achieved = f64::from(plan.compare) / f64::from(plan.period);
            prop_assert!((achieved - duty).abs() <= 1.0 / f64::from(plan.period));
        }

        #[test]
        fn compare_never_exceeds_period_mid_commit(
            old_period in 1u32..=65_535,
            old_frac in 0.0f64..=1.0,
            new_period in 1u32..=65_535,
            new_frac in 0.0f64..=1.0,
        ) {
            let old_compare = duty_compare(old_period, old_frac);
            let new_compare = duty_compare(new_period, new_frac);
            let (mut period, mut compare) = (old_period, old_compare);
            for write in commit_order((old_period, old_compare), (new_period, new_compare)) {
                match write {
                    PwmWrite::Period(p) => period = p,
                    PwmWrite::Compare(c) => compare = c,
                }
                prop_assert!(compare <= period);
            }
            prop_assert_eq!((period, compare), (new_period, new_compare));
        }
    }
}
