use serde::Serialize;
use socbridge_transport::{list_serial_ports_in, SerialPortInfo};

use crate::cmd::{LinkArgs, PortsArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{or_dash, print_json, table, OutputFormat};

#[derive(Serialize)]
struct PortsOutput {
    sysfs_root: String,
    ports: Vec<SerialPortInfo>,
}

pub fn run(args: PortsArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let (root, signature) = link.serial_probe()?;
    let ports: Vec<SerialPortInfo> = list_serial_ports_in(&root, &signature)
        .into_iter()
        .filter(|port| port.matched || !args.matched)
        .collect();

    match format {
        OutputFormat::Json => print_json(&PortsOutput {
            sysfs_root: root.display().to_string(),
            ports,
        }),
        OutputFormat::Table => {
            let mut out = table(vec!["PORT", "USB ID", "MANUFACTURER", "PRODUCT", "CONTROLLER"]);
            for port in &ports {
                out.add_row(vec![
                    port.path.display().to_string(),
                    or_dash(port.usb_id()),
                    or_dash(port.manufacturer.as_deref()),
                    or_dash(port.description()),
                    if port.matched { "yes" } else { "no" }.to_string(),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in &ports {
                println!(
                    "{} {} {}{}",
                    port.path.display(),
                    or_dash(port.usb_id()),
                    port.description().unwrap_or("unknown device"),
                    if port.matched { " [controller]" } else { "" }
                );
            }
        }
        OutputFormat::Raw => {
            for port in &ports {
                println!("{}", port.path.display());
            }
        }
    }

    Ok(SUCCESS)
}
