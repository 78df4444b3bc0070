use crate::cmd::{open_session, LinkArgs, ResetArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

pub fn run(_args: ResetArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = open_session(link, false)?;
    session
        .disconnect()
        .map_err(|err| session_error("reset failed", err))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "reset": true })),
        OutputFormat::Table | OutputFormat::Pretty => println!("controller reset"),
        OutputFormat::Raw => {}
    }
    Ok(SUCCESS)
}
