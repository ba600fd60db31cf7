use bulklink_session::Session;
use serde::Serialize;

use crate::cmd::{open_session, ProbeArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{compact, now_unix_seconds, print_report, value_to_json, OutputFormat, Report};

#[derive(Serialize)]
struct ProbeOutput {
    socket: String,
    session_id: serde_json::Value,
    profile: serde_json::Map<String, serde_json::Value>,
    client_identity: String,
    timestamp: String,
}

impl Report for ProbeOutput {
    fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("socket".to_string(), self.socket.clone()),
            ("session".to_string(), compact(&self.session_id)),
            ("client".to_string(), self.client_identity.clone()),
        ];
        rows.extend(
            self.profile
                .iter()
                .map(|(key, value)| (format!("profile.{key}"), compact(value))),
        );
        rows
    }
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.link.session_config()?;
    let session = open_session(&args.link)?;

    let out = describe(&session, &args, config.client_identity);
    session.stop();

    print_report(&out, format);
    Ok(SUCCESS)
}

fn describe(session: &Session, args: &ProbeArgs, client_identity: String) -> ProbeOutput {
    let profile = session
        .endpoint_profile()
        .entries()
        .iter()
        .map(|(key, value)| {
            let key = match value_to_json(key) {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value_to_json(value))
        })
        .collect();

    ProbeOutput {
        socket: args.link.path.display().to_string(),
        session_id: value_to_json(session.session_id().value()),
        profile,
        client_identity,
        timestamp: now_unix_seconds(),
    }
}
