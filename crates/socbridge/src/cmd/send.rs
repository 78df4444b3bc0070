use serde::Serialize;
use socbridge_session::Delivery;

use crate::cmd::query::command_from;
use crate::cmd::{open_session, LinkArgs, SendArgs};
use crate::exit::{session_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct SendOutput {
    command: String,
    accepted: bool,
    attempts: u32,
    reason: Option<String>,
}

/// A dropped write exits non-zero; the controller state is unchanged.
pub fn run(args: SendArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let command = command_from(&args.frame)?;
    let session = open_session(link, false)?;
    let delivery = session
        .send(&command)
        .map_err(|err| session_error("send failed", err))?;

    let out = SendOutput {
        command: command.to_string(),
        accepted: delivery.is_accepted(),
        attempts: delivery.attempts(),
        reason: match &delivery {
            Delivery::Accepted { .. } => None,
            Delivery::Dropped { reason, .. } => Some(reason.to_string()),
        },
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("command", out.command.clone()),
            ("accepted", out.accepted.to_string()),
            ("attempts", out.attempts.to_string()),
            ("reason", out.reason.clone().unwrap_or_else(|| "-".to_string())),
        ]),
        OutputFormat::Pretty => match &out.reason {
            None => println!("{} accepted after {} attempt(s)", out.command, out.attempts),
            Some(reason) => println!(
                "{} dropped after {} attempt(s): {reason}",
                out.command, out.attempts
            ),
        },
        OutputFormat::Raw => println!("{}", if out.accepted { "accepted" } else { "dropped" }),
    }

    Ok(if out.accepted { SUCCESS } else { FAILURE })
}
