//! PWM channel handle.

use socbridge_frame::{pwm_register, Command};
use tracing::{debug, warn};

use crate::diagnostics::Diagnostic;
use crate::engine::Delivery;
use crate::error::{CapabilityError, Result};
use crate::session::ControllerSession;
use crate::synthesis::{
    commit_order, plan_frequency, ClockState, FrequencyPlan, FrequencyRequest, PwmWrite,
};
use crate::topology::MAX_DIVIDER;

/// Sub-opcodes of a PWM register.
pub mod opcode {
    pub const START: u8 = 0x00;
    pub const STOP: u8 = 0x01;
    pub const WRITE_PERIOD: u8 = 0x0C;
    pub const READ_PERIOD: u8 = 0x0D;
    pub const WRITE_COMPARE: u8 = 0x0E;
    pub const READ_COMPARE: u8 = 0x0F;
    pub const CLEAR_FIFO: u8 = 0x18;
    pub const SLEEP: u8 = 0x19;
    pub const WAKEUP: u8 = 0x1A;
    /// Set the shared clock divider; the reply is the new divider minus one.
    pub const CLOCK_DIVIDER: u8 = 0xFF;
}

/// Frequency of MIDI note 69 (A4).
const A4_HZ: f64 = 440.0;
const A4_NOTE: f64 = 69.0;

/// Frequency of a MIDI note.
pub fn midi_to_hz(note: f64) -> f64 {
    A4_HZ * 2f64.powf((note - A4_NOTE) / 12.0)
}

/// Nearest MIDI note to a frequency.
pub fn hz_to_midi(hz: f64) -> i32 {
    (A4_NOTE + 12.0 * (hz / A4_HZ).log2()).round() as i32
}

/// One PWM channel on a connected controller.
///
/// Period and compare are cached from the last read or write. The clock
/// divider lives in the session topology because other channels share it.
#[derive(Debug)]
pub struct Pwm<'s> {
    session: &'s ControllerSession,
    channel: u8,
    register: u8,
    clock: u8,
    resolution_bits: u8,
    max_count: u32,
    period: u32,
    compare: u32,
    running: bool,
}

impl<'s> Pwm<'s> {
    /// Attach to a discovered channel and read its period and compare.
    pub fn open(session: &'s ControllerSession, channel: u8) -> Result<Self> {
        let binding = session.with_topology(|t| t.require_pwm(channel))??;
        let register = pwm_register(channel).ok_or_else(|| CapabilityError::NotPresent {
            what: format!("PWM channel {channel}"),
        })?;
        let source_hz =
            session.with_topology(|t| t.clock(binding.clock).map_or(0, |c| c.source_hz))?;
        if source_hz == 0 {
            return Err(CapabilityError::NotPresent {
                what: format!("a known source for clock {}", binding.clock),
            }
            .into());
        }

        session.claim_register(register);
        let mut pwm = Self {
            session,
            channel,
            register,
            clock: binding.clock,
            resolution_bits: binding.assignment.resolution_bits,
            max_count: binding.assignment.max_count(),
            period: 0,
            compare: 0,
            running: false,
        };
        pwm.read_period()?;
        pwm.read_compare()?;
        debug!(channel, clock = pwm.clock, period = pwm.period, compare = pwm.compare, "PWM opened");
        Ok(pwm)
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn register(&self) -> u8 {
        self.register
    }

    pub fn clock_id(&self) -> u8 {
        self.clock
    }

    pub fn resolution_bits(&self) -> u8 {
        self.resolution_bits
    }

    /// Largest period or compare value the counter holds.
    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> Result<Delivery> {
        let delivery = self.command(opcode::START, 0)?;
        self.running = true;
        Ok(delivery)
    }

    pub fn stop(&mut self) -> Result<Delivery> {
        let delivery = self.command(opcode::STOP, 0)?;
        self.running = false;
        Ok(delivery)
    }

    pub fn clear_fifo(&self) -> Result<Delivery> {
        self.command(opcode::CLEAR_FIFO, 0)
    }

    pub fn sleep(&mut self) -> Result<Delivery> {
        let delivery = self.command(opcode::SLEEP, 0)?;
        self.running = false;
        Ok(delivery)
    }

    pub fn wakeup(&mut self) -> Result<Delivery> {
        let delivery = self.command(opcode::WAKEUP, 0)?;
        self.running = true;
        Ok(delivery)
    }

    /// Cached period.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Cached compare value.
    pub fn compare(&self) -> u32 {
        self.compare
    }

    /// Read the period from the controller.
    pub fn read_period(&mut self) -> Result<u32> {
        if let Some(period) = self.read_count(opcode::READ_PERIOD)? {
            self.period = period;
        }
        Ok(self.period)
    }

    /// Read the compare value from the controller.
    pub fn read_compare(&mut self) -> Result<u32> {
        if let Some(compare) = self.read_count(opcode::READ_COMPARE)? {
            self.compare = compare;
        }
        Ok(self.compare)
    }

    /// Write a new period, lowering compare first if it would exceed it.
    pub fn write_period(&mut self, period: i64) -> Result<u32> {
        let period = self.clamp_count("period", period);
        if period < self.compare {
            self.put(PwmWrite::Compare(period))?;
        }
        self.put(PwmWrite::Period(period))?;
        Ok(period)
    }

    /// Write a new compare value, raising the period first if needed.
    pub fn write_compare(&mut self, compare: i64) -> Result<u32> {
        let compare = self.clamp_count("compare", compare);
        if compare > self.period {
            self.put(PwmWrite::Period(compare))?;
        }
        self.put(PwmWrite::Compare(compare))?;
        Ok(compare)
    }

    /// Active share of the period, in percent.
    pub fn duty_cycle(&self) -> f64 {
        if self.period == 0 {
            return 0.0;
        }
        100.0 * f64::from(self.compare) / f64::from(self.period)
    }

    /// Set the compare value from a percentage of the period.
    pub fn set_duty_cycle(&mut self, percent: f64) -> Result<u32> {
        let applied = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        if applied != percent {
            self.session.report(Diagnostic::ValueClamped {
                what: "duty cycle",
                requested: percent,
                applied,
            });
        }
        let compare = (f64::from(self.period) * applied / 100.0).round() as i64;
        self.write_compare(compare)
    }

    /// Divider of this channel's clock as last confirmed by the controller.
    pub fn clock_divider(&self) -> Result<u32> {
        Ok(self.clock_state()?.divider)
    }

    /// Rate of this channel's clock after division.
    pub fn clock_hz(&self) -> Result<f64> {
        Ok(self.clock_state()?.frequency_hz())
    }

    /// Output frequency from the cached period.
    pub fn frequency(&self) -> Result<f64> {
        if self.period == 0 {
            return Ok(0.0);
        }
        Ok(self.clock_hz()? / f64::from(self.period))
    }

    /// Nearest MIDI note to the current output frequency.
    pub fn midi(&self) -> Result<i32> {
        Ok(hz_to_midi(self.frequency()?))
    }

    /// Change the shared clock divider.
    ///
    /// Affects every channel on the same clock. Returns the divider the
    /// controller confirmed.
    pub fn set_clock_divider(&mut self, divider: i64) -> Result<u32> {
        let applied = divider.clamp(1, i64::from(MAX_DIVIDER));
        if applied != divider {
            self.session.report(Diagnostic::ValueClamped {
                what: "clock divider",
                requested: divider as f64,
                applied: applied as f64,
            });
        }
        // Always within u16 after the clamp above.
        let payload = u16::try_from(applied).unwrap_or(u16::MAX);
        let command = Command::new(self.register, opcode::CLOCK_DIVIDER).with_payload(payload);
        let response = self.session.query_response(&command)?;
        if response.is_bad_parameter() {
            return self.clock_divider();
        }
        let confirmed = response
            .value(self.session.engine().revision())
            .saturating_add(1)
            .clamp(1, i64::from(MAX_DIVIDER));
        let confirmed = u32::try_from(confirmed).unwrap_or(MAX_DIVIDER);
        self.session.update_clock_divider(self.clock, confirmed)?;
        Ok(confirmed)
    }

    /// Aim the shared clock at `hz` by picking the nearest divider.
    pub fn set_clock_frequency(&mut self, hz: f64) -> Result<u32> {
        let state = self.clock_state()?;
        let max = f64::from(state.source_hz);
        let min = state.min_clock_hz();
        let applied = if hz.is_nan() { min } else { hz.clamp(min, max) };
        if applied != hz {
            self.session.report(Diagnostic::ValueClamped {
                what: "clock frequency",
                requested: hz,
                applied,
            });
        }
        self.set_clock_divider((max / applied).round() as i64)
    }

    /// Reach `hz` within the session's tolerance, keeping the duty cycle.
    ///
    /// Moves the shared clock divider only when the period alone cannot get
    /// close enough. A target outside the reachable band, or one no divider
    /// can meet, is reported and the closest result is applied. Period and
    /// compare are computed for the divider the controller confirmed, which
    /// the returned plan reports.
    pub fn set_frequency(&mut self, hz: f64) -> Result<FrequencyPlan> {
        let limits = self.session.config().synthesis;
        let clock = self.clock_state()?;
        let request = FrequencyRequest {
            target_hz: hz,
            duty_cycle: self.duty_cycle() / 100.0,
            max_count: self.max_count,
        };
        let mut plan = plan_frequency(clock, request, &limits).ok_or_else(|| {
            CapabilityError::NotPresent {
                what: format!("a known source for clock {}", self.clock),
            }
        })?;

        if plan.clamped {
            self.session.report(Diagnostic::FrequencyClamped {
                channel: self.channel,
                requested_hz: plan.requested_hz,
                applied_hz: plan.target_hz,
            });
        }
        if plan.divider_changed {
            let applied = self.set_clock_divider(i64::from(plan.divider))?;
            if applied != plan.divider {
                warn!(
                    channel = self.channel,
                    planned = plan.divider,
                    applied,
                    "controller applied a different clock divider"
                );
                plan = plan.with_divider(clock, applied, &request, &limits);
            }
        }
        if !plan.within_tolerance {
            self.session.report(Diagnostic::ToleranceNotMet {
                channel: self.channel,
                target_hz: plan.target_hz,
                achieved_hz: plan.achieved_hz,
                error_percent: plan.error_percent,
            });
        }

        for write in commit_order((self.period, self.compare), (plan.period, plan.compare)) {
            self.put(write)?;
        }
        debug!(
            channel = self.channel,
            target_hz = plan.target_hz,
            achieved_hz = plan.achieved_hz,
            divider = plan.divider,
            period = plan.period,
            "PWM frequency set"
        );
        Ok(plan)
    }

    pub fn set_midi(&mut self, note: f64) -> Result<FrequencyPlan> {
        self.set_frequency(midi_to_hz(note))
    }

    fn clock_state(&self) -> Result<ClockState> {
        let clock = self.clock;
        let state = self.session.with_topology(|t| {
            t.clock(clock).map(|c| ClockState {
                source_hz: c.source_hz,
                divider: c.divider,
            })
        })?;
        Ok(state.ok_or_else(|| CapabilityError::NotPresent {
            what: format!("clock {clock}"),
        })?)
    }

    fn command(&self, opcode: u8, payload: u16) -> Result<Delivery> {
        self.session
            .send(&Command::new(self.register, opcode).with_payload(payload))
    }

    fn put(&mut self, write: PwmWrite) -> Result<()> {
        match write {
            PwmWrite::Period(period) => {
                self.command(opcode::WRITE_PERIOD, self.payload(period))?;
                self.period = period;
            }
            PwmWrite::Compare(compare) => {
                self.command(opcode::WRITE_COMPARE, self.payload(compare))?;
                self.compare = compare;
            }
        }
        Ok(())
    }

    fn payload(&self, count: u32) -> u16 {
        u16::try_from(count.min(self.max_count)).unwrap_or(u16::MAX)
    }

    fn clamp_count(&self, what: &'static str, value: i64) -> u32 {
        let applied = value.clamp(0, i64::from(self.max_count));
        if applied != value {
            self.session.report(Diagnostic::ValueClamped {
                what,
                requested: value as f64,
                applied: applied as f64,
            });
        }
        u32::try_from(applied).unwrap_or(self.max_count)
    }

    fn read_count(&self, opcode: u8) -> Result<Option<u32>> {
        let response = self
            .session
            .query_response(&Command::new(self.register, opcode))?;
        if response.is_bad_parameter() {
            return Ok(None);
        }
        let value = response.value(self.session.engine().revision());
        Ok(Some(
            u32::try_from(value.clamp(0, i64::from(self.max_count))).unwrap_or(self.max_count),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_helpers_agree() {
        assert_eq!(midi_to_hz(69.0), 440.0);
        assert!((midi_to_hz(81.0) - 880.0).abs() < 1e-9);
        assert_eq!(hz_to_midi(440.0), 69);
        assert_eq!(hz_to_midi(261.63), 60);
        assert_eq!(hz_to_midi(midi_to_hz(45.0)), 45);
    }
}
