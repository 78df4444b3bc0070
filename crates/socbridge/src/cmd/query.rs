use serde::Serialize;
use socbridge_frame::{register_name, Command, ResponseStatus};

use crate::cmd::{open_session, FrameArgs, LinkArgs, QueryArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{hex_word, print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct QueryOutput {
    register: u8,
    register_name: &'static str,
    opcode: u8,
    payload: u16,
    raw: String,
    status: &'static str,
    value: i64,
}

/// Build the command, letting the frame layer clamp wide payloads.
pub(crate) fn command_from(frame: &FrameArgs) -> CliResult<Command> {
    Command::try_new(
        u32::from(frame.register),
        u32::from(frame.opcode),
        frame.payload,
    )
    .map_err(|err| session_error("invalid command", err.into()))
}

pub fn run(args: QueryArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let command = command_from(&args.frame)?;
    let session = open_session(link, false)?;
    let response = session
        .query_response(&command)
        .map_err(|err| session_error("query failed", err))?;

    let out = QueryOutput {
        register: command.register,
        register_name: register_name(command.register),
        opcode: command.opcode,
        payload: command.payload,
        raw: hex_word(response.raw()),
        status: match response.status() {
            ResponseStatus::Accepted => "accepted",
            ResponseStatus::BadParameter => "bad_parameter",
            ResponseStatus::Value => "value",
        },
        value: response.value(session.engine().revision()),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("command", command.to_string()),
            ("raw", out.raw.clone()),
            ("status", out.status.to_string()),
            ("value", out.value.to_string()),
        ]),
        OutputFormat::Pretty => println!("{command} -> {response} ({})", out.value),
        OutputFormat::Raw => println!("{}", out.value),
    }
    Ok(SUCCESS)
}
