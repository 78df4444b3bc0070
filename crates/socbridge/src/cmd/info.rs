use serde::Serialize;
use socbridge_session::{ControllerSession, Topology};
use socbridge_transport::LinkState;

use crate::cmd::{open_session, InfoArgs, LinkArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    transport: Option<&'static str>,
    port: Option<String>,
    revision: String,
    link: LinkState,
    topology: Topology,
}

pub fn run(_args: InfoArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = open_session(link, true)?;
    let topology = session
        .topology()
        .map_err(|err| session_error("discovery failed", err))?;
    let out = describe(&session, topology);

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_tables(&out),
        OutputFormat::Pretty => print_pretty(&out),
        OutputFormat::Raw => println!("{}", out.topology.firmware),
    }
    Ok(SUCCESS)
}

fn describe(session: &ControllerSession, topology: Topology) -> InfoOutput {
    let (transport, port) = session.engine().with_connection(|conn| {
        (conn.transport_name(), conn.port().map(ToString::to_string))
    });
    InfoOutput {
        transport,
        port,
        revision: session.engine().revision().to_string(),
        link: session.link_state(),
        topology,
    }
}

fn analog_summary(topology: &Topology) -> String {
    let analog = &topology.analog;
    let blocks = [
        ("DelSig", analog.delsig_adc),
        ("SAR0", analog.sar_adc0),
        ("SAR1", analog.sar_adc1),
        ("VDAC0", analog.vdac0),
        ("VDAC1", analog.vdac1),
        ("IDAC0", analog.idac0),
        ("IDAC1", analog.idac1),
        ("WaveDAC", analog.wavedac),
    ];
    let present: Vec<&str> = blocks
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| *name)
        .collect();
    if present.is_empty() {
        "none".to_string()
    } else {
        present.join(", ")
    }
}

fn pin_summary(topology: &Topology) -> String {
    topology
        .ports
        .iter()
        .map(|(port, pins)| {
            let pins: Vec<String> = pins.iter().map(u8::to_string).collect();
            format!("P{port}[{}]", pins.join(","))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_tables(out: &InfoOutput) {
    let topology = &out.topology;
    print_fields(&[
        ("transport", out.transport.unwrap_or("-").to_string()),
        ("port", out.port.clone().unwrap_or_else(|| "-".to_string())),
        ("revision", out.revision.clone()),
        ("link", out.link.to_string()),
        ("firmware", topology.firmware.to_string()),
        ("analog", analog_summary(topology)),
        ("analog pins", topology.analog.analog_pins.to_string()),
        ("capsense sensors", topology.analog.capsense_sensors.to_string()),
        ("digital pins", pin_summary(topology)),
    ]);

    let mut clocks = table(vec!["CLOCK", "SOURCE", "DIVIDER", "RATE (Hz)", "PWM", "BITS"]);
    for (id, clock) in &topology.clocks {
        for assignment in &clock.consumers {
            clocks.add_row(vec![
                id.to_string(),
                clock.source.to_string(),
                clock.divider.to_string(),
                format!("{:.1}", clock.frequency_hz()),
                assignment.channel.to_string(),
                assignment.resolution_bits.to_string(),
            ]);
        }
    }
    println!("{clocks}");
}

fn print_pretty(out: &InfoOutput) {
    let topology = &out.topology;
    println!(
        "controller on {} ({}), firmware {}, protocol {}",
        out.port.as_deref().unwrap_or("?"),
        out.transport.unwrap_or("?"),
        topology.firmware,
        out.revision
    );
    println!("  analog: {}", analog_summary(topology));
    println!("  digital pins: {} ({})", topology.pin_count(), pin_summary(topology));
    println!("  pwm channels: {}", topology.pwm_count);
    for (id, clock) in &topology.clocks {
        println!(
            "    clock {id}: {} / {} = {:.1} Hz -> PWM {:?}",
            clock.source,
            clock.divider,
            clock.frequency_hz(),
            clock.channels()
        );
    }
}
