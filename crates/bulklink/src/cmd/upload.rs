use std::fs;
use std::time::{Duration, Instant};

use bulklink_frame::MAX_PAYLOAD;
use bulklink_session::Session;
use serde::Serialize;
use tracing::debug;

use crate::cmd::{open_session, parse_duration, UploadArgs};
use crate::exit::{io_error, session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Serialize)]
struct UploadOutput {
    file: String,
    channel: u8,
    channel_type: String,
    bytes: usize,
    blocks: usize,
    elapsed_ms: u64,
    throughput_kib_s: f64,
}

impl Report for UploadOutput {
    fn rows(&self) -> Vec<(String, String)> {
        vec![
            ("file".to_string(), self.file.clone()),
            ("channel".to_string(), self.channel.to_string()),
            ("type".to_string(), self.channel_type.clone()),
            ("bytes".to_string(), self.bytes.to_string()),
            ("blocks".to_string(), self.blocks.to_string()),
            ("elapsed_ms".to_string(), self.elapsed_ms.to_string()),
            (
                "throughput_kib_s".to_string(),
                format!("{:.1}", self.throughput_kib_s),
            ),
        ]
    }
}

pub fn run(args: UploadArgs, format: OutputFormat) -> CliResult<i32> {
    validate_chunk(args.chunk)?;
    let ack_timeout = parse_duration(&args.ack_timeout)?;
    let data = fs::read(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;

    let session = open_session(&args.link)?;
    let started = Instant::now();
    let result = transfer(&session, &args, &data, ack_timeout);
    let elapsed = started.elapsed();
    session.stop();
    let (channel, blocks) = result?;

    print_report(
        &UploadOutput {
            file: args.file.display().to_string(),
            channel,
            channel_type: args.channel_type,
            bytes: data.len(),
            blocks,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            throughput_kib_s: throughput_kib_s(data.len(), elapsed),
        },
        format,
    );
    Ok(SUCCESS)
}

fn validate_chunk(chunk: usize) -> CliResult<()> {
    if chunk == 0 || chunk > MAX_PAYLOAD {
        return Err(CliError::new(
            USAGE,
            format!("--chunk must be between 1 and {MAX_PAYLOAD}"),
        ));
    }
    Ok(())
}

fn transfer(
    session: &Session,
    args: &UploadArgs,
    data: &[u8],
    ack_timeout: Duration,
) -> CliResult<(u8, usize)> {
    let channel = session
        .open_channel(&args.channel_type)
        .map_err(|err| session_error("open failed", err))?;

    let mut blocks = 0usize;
    for (n, block) in data.chunks(args.chunk).enumerate() {
        channel
            .send_binary_with_timeout(block, ack_timeout)
            .map_err(|err| session_error(&format!("block {n} not acknowledged"), err))?;
        blocks += 1;
        debug!(block = n, size = block.len(), "block acknowledged");
    }
    Ok((channel.index(), blocks))
}

fn throughput_kib_s(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    ((bytes as f64 / 1024.0 / secs) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_bounds() {
        assert!(validate_chunk(1).is_ok());
        assert!(validate_chunk(MAX_PAYLOAD).is_ok());
        assert_eq!(validate_chunk(0).unwrap_err().code, USAGE);
        assert_eq!(validate_chunk(MAX_PAYLOAD + 1).unwrap_err().code, USAGE);
    }

    #[test]
    fn throughput_rounds_to_one_decimal() {
        assert_eq!(throughput_kib_s(2048, Duration::from_secs(1)), 2.0);
        assert_eq!(throughput_kib_s(1000, Duration::ZERO), 0.0);
    }
}
