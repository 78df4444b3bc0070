use serde::Serialize;
use socbridge_session::{FrequencyPlan, Pwm};

use crate::cmd::{open_session, LinkArgs, PwmArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct PlanOutput {
    requested_hz: f64,
    target_hz: f64,
    clamped: bool,
    divider_changed: bool,
    achieved_hz: f64,
    error_percent: f64,
    within_tolerance: bool,
}

impl From<FrequencyPlan> for PlanOutput {
    fn from(plan: FrequencyPlan) -> Self {
        Self {
            requested_hz: plan.requested_hz,
            target_hz: plan.target_hz,
            clamped: plan.clamped,
            divider_changed: plan.divider_changed,
            achieved_hz: plan.achieved_hz,
            error_percent: plan.error_percent,
            within_tolerance: plan.within_tolerance,
        }
    }
}

#[derive(Serialize)]
struct PwmOutput {
    channel: u8,
    clock: u8,
    resolution_bits: u8,
    divider: u32,
    clock_hz: f64,
    period: u32,
    compare: u32,
    frequency_hz: f64,
    duty_cycle: f64,
    midi_note: i32,
    running: Option<bool>,
    plan: Option<PlanOutput>,
}

pub fn run(args: PwmArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = open_session(link, true)?;
    let mut pwm = Pwm::open(&session, args.channel)
        .map_err(|err| session_error("pwm open failed", err))?;

    let plan = apply(&mut pwm, &args).map_err(|err| session_error("pwm update failed", err))?;
    let out = snapshot(&pwm, &args, plan).map_err(|err| session_error("pwm read failed", err))?;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("channel", out.channel.to_string()),
            ("clock", format!("{} ({}-bit counter)", out.clock, out.resolution_bits)),
            ("divider", out.divider.to_string()),
            ("clock rate", format!("{:.1} Hz", out.clock_hz)),
            ("period", out.period.to_string()),
            ("compare", out.compare.to_string()),
            ("frequency", format!("{:.3} Hz", out.frequency_hz)),
            ("duty cycle", format!("{:.2}%", out.duty_cycle)),
            ("midi note", out.midi_note.to_string()),
        ]),
        OutputFormat::Pretty => {
            println!(
                "PWM {}: {:.3} Hz, {:.2}% duty (clock {} / {}, period {}, compare {})",
                out.channel,
                out.frequency_hz,
                out.duty_cycle,
                out.clock,
                out.divider,
                out.period,
                out.compare
            );
            if let Some(plan) = &out.plan {
                if !plan.within_tolerance {
                    println!(
                        "  requested {:.3} Hz is {:.2}% off",
                        plan.target_hz, plan.error_percent
                    );
                }
            }
        }
        OutputFormat::Raw => println!("{}", out.frequency_hz),
    }
    Ok(SUCCESS)
}

/// Divider first, then frequency, then duty, then run state.
fn apply(pwm: &mut Pwm<'_>, args: &PwmArgs) -> socbridge_session::Result<Option<FrequencyPlan>> {
    if let Some(divider) = args.divider {
        pwm.set_clock_divider(divider)?;
    }
    let plan = match (args.frequency, args.midi) {
        (Some(hz), _) => Some(pwm.set_frequency(hz)?),
        (None, Some(note)) => Some(pwm.set_midi(note)?),
        (None, None) => None,
    };
    if let Some(duty) = args.duty {
        pwm.set_duty_cycle(duty)?;
    }
    if args.start {
        pwm.start()?;
    } else if args.stop {
        pwm.stop()?;
    }
    Ok(plan)
}

fn snapshot(
    pwm: &Pwm<'_>,
    args: &PwmArgs,
    plan: Option<FrequencyPlan>,
) -> socbridge_session::Result<PwmOutput> {
    Ok(PwmOutput {
        channel: pwm.channel(),
        clock: pwm.clock_id(),
        resolution_bits: pwm.resolution_bits(),
        divider: pwm.clock_divider()?,
        clock_hz: pwm.clock_hz()?,
        period: pwm.period(),
        compare: pwm.compare(),
        frequency_hz: pwm.frequency()?,
        duty_cycle: pwm.duty_cycle(),
        midi_note: pwm.midi()?,
        // The controller cannot report run state; only what this call did is known.
        running: (args.start || args.stop).then_some(pwm.is_running()),
        plan: plan.map(PlanOutput::from),
    })
}
