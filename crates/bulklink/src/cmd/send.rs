use std::fs;
use std::time::Duration;

use bulklink_session::Session;
use serde::Serialize;

use crate::cmd::{open_session, parse_duration, SendArgs};
use crate::exit::{io_error, session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{compact, print_report, value_to_json, OutputFormat, Report};

#[derive(Serialize)]
struct SendOutput {
    channel: u8,
    channel_type: String,
    sent: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<serde_json::Value>,
}

impl Report for SendOutput {
    fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("channel".to_string(), self.channel.to_string()),
            ("type".to_string(), self.channel_type.clone()),
            ("sent".to_string(), compact(&self.sent)),
        ];
        if let Some(reply) = &self.reply {
            rows.push(("reply".to_string(), compact(reply)));
        }
        rows
    }
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let session = open_session(&args.link)?;
    let result = exchange(&session, &args, &payload, wait_timeout);
    session.stop();
    let (channel, reply) = result?;

    print_report(
        &SendOutput {
            channel,
            channel_type: args.channel_type,
            sent: payload,
            reply,
        },
        format,
    );
    Ok(SUCCESS)
}

/// Open the channel, send the payload and optionally wait for a reply.
/// The channel is closed when it goes out of scope.
fn exchange(
    session: &Session,
    args: &SendArgs,
    payload: &serde_json::Value,
    wait_timeout: Duration,
) -> CliResult<(u8, Option<serde_json::Value>)> {
    let channel = session
        .open_channel(&args.channel_type)
        .map_err(|err| session_error("open failed", err))?;
    channel
        .send_object(payload)
        .map_err(|err| session_error("send failed", err))?;

    let reply = if args.wait {
        let value = channel
            .get_object_with_timeout(wait_timeout)
            .map_err(|err| session_error("receive failed", err))?;
        Some(value_to_json(&value))
    } else {
        None
    };
    Ok((channel.index(), reply))
}

fn resolve_payload(args: &SendArgs) -> CliResult<serde_json::Value> {
    let text = match (&args.json, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        (None, None) => return Err(CliError::new(USAGE, "one of --json or --file is required")),
    };
    serde_json::from_str(&text)
        .map_err(|err| CliError::new(USAGE, format!("payload is not valid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cmd::LinkArgs;

    fn args(json: Option<&str>) -> SendArgs {
        SendArgs {
            link: LinkArgs {
                path: PathBuf::from("/tmp/unused.sock"),
                timeout: "1s".to_string(),
                handshake_retries: 5,
                client_id: None,
            },
            channel_type: "robot".to_string(),
            json: json.map(str::to_string),
            file: None,
            wait: false,
            wait_timeout: "3s".to_string(),
        }
    }

    #[test]
    fn inline_json_is_parsed() {
        let payload = resolve_payload(&args(Some(r#"{"cmd":"home"}"#))).unwrap();
        assert_eq!(payload, serde_json::json!({"cmd": "home"}));
    }

    #[test]
    fn invalid_json_is_a_usage_error() {
        let err = resolve_payload(&args(Some("{not json"))).expect_err("should fail");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn missing_payload_is_a_usage_error() {
        let err = resolve_payload(&args(None)).expect_err("should fail");
        assert_eq!(err.code, USAGE);
    }
}
