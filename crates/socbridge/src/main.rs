mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, LinkArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "socbridge", version, about = "PSoC controller CLI")]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.link, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_hex_arguments() {
        let cli = Cli::try_parse_from(["socbridge", "query", "0xFE", "0x09"])
            .expect("query args should parse");
        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.frame.register, 0xFE);
                assert_eq!(args.frame.opcode, 0x09);
                assert_eq!(args.frame.payload, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn link_flags_are_global() {
        let cli = Cli::try_parse_from([
            "socbridge",
            "info",
            "--transport",
            "i2c",
            "--i2c-address",
            "0x08",
            "--timeout",
            "500ms",
        ])
        .expect("global link flags should parse after the subcommand");
        assert!(matches!(cli.command, Command::Info(_)));
        assert_eq!(cli.link.i2c_address, Some(0x08));
    }

    #[test]
    fn rejects_conflicting_pwm_targets() {
        let err = Cli::try_parse_from([
            "socbridge",
            "pwm",
            "0",
            "--frequency",
            "50",
            "--midi",
            "69",
        ])
        .expect_err("frequency and midi together should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_bad_register_id() {
        let err = Cli::try_parse_from(["socbridge", "send", "0x100", "0"])
            .expect_err("register ids are one byte");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
