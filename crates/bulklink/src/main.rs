mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "bulklink",
    version,
    about = "Talk to devices over multiplexed bulk links"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "BULKLINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

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
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "bulklink",
            "send",
            "/tmp/device.sock",
            "--type",
            "robot",
            "--json",
            "{\"cmd\":\"home\"}",
            "--wait",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.channel_type, "robot");
                assert!(args.wait);
                assert_eq!(args.link.handshake_retries, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "bulklink",
            "send",
            "/tmp/device.sock",
            "--type",
            "robot",
            "--json",
            "{}",
            "--file",
            "payload.json",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_payload() {
        let err = Cli::try_parse_from(["bulklink", "send", "/tmp/device.sock", "--type", "robot"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_upload_with_chunk() {
        let cli = Cli::try_parse_from([
            "bulklink",
            "--format",
            "json",
            "upload",
            "/tmp/device.sock",
            "--file",
            "fw.bin",
            "--chunk",
            "1024",
        ])
        .expect("upload args should parse");
        match cli.command {
            Command::Upload(args) => {
                assert_eq!(args.chunk, 1024);
                assert_eq!(args.channel_type, "binary");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_emulate_refusals() {
        let cli = Cli::try_parse_from([
            "bulklink",
            "emulate",
            "/tmp/device.sock",
            "--refuse",
            "camera,audio",
            "--once",
        ])
        .expect("emulate args should parse");
        match cli.command {
            Command::Emulate(args) => {
                assert_eq!(args.refuse, vec!["camera", "audio"]);
                assert!(args.once);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
