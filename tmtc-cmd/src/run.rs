use std::{
    fs::File,
    io::{stdin, stdout, BufRead, BufReader, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tmtc::{
    link::{build_link, LinkConfig, LinkContext, LinkHandle},
    spacepacket::SequenceCounters,
    tc::{CommandId, CommandRouter, PreparedCommand},
    timecode::{TimeService, WallClock},
    tm::{ProcessedPacket, TmSink},
};
use tracing::{info, warn};

/// Writes each packet as one JSON line to stdout.
struct StdoutSink {
    link: String,
}

#[derive(Serialize)]
struct Line<'a> {
    link: &'a str,
    #[serde(flatten)]
    packet: &'a ProcessedPacket,
    data: String,
}

impl TmSink for StdoutSink {
    fn process_packet(&self, packet: ProcessedPacket) {
        let line = Line {
            link: &self.link,
            packet: &packet,
            data: hex::encode(packet.bytes()),
        };
        let mut out = stdout().lock();
        let written = serde_json::to_writer(&mut out, &line)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(out));
        if let Err(err) = written {
            warn!(link = %self.link, "writing packet: {err}");
        }
    }
}

fn load_config(path: &Path) -> Result<Vec<LinkConfig>> {
    let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {path:?}"))
}

fn start_links(configs: &[LinkConfig]) -> Result<Vec<LinkHandle>> {
    let mut handles = Vec::with_capacity(configs.len());
    // commands routed to any TC link share one count per APID
    let tc_counters = SequenceCounters::new();
    for config in configs {
        let sink = StdoutSink {
            link: config.name.clone(),
        };
        let ctx = LinkContext::builder()
            .sink(Arc::new(sink) as Arc<dyn TmSink>)
            .tc_counters(tc_counters.clone())
            .build();
        let handle = build_link(config, &ctx)
            .with_context(|| format!("configuring link {}", config.name))?;
        info!(link = %config.name, status = %handle.link.status(), "link configured");
        handles.push(handle);
    }
    Ok(handles)
}

/// Parse one line of stdin into a command.
fn parse_command(line: &str, sequence_number: u32, now: hifitime::Epoch) -> Result<PreparedCommand> {
    let binary = hex::decode(line.trim()).context("commands must be hex encoded")?;
    Ok(PreparedCommand::new(
        CommandId {
            origin: "stdin".to_string(),
            sequence_number,
            generation_time: now,
            command_name: "raw".to_string(),
        },
        binary,
    ))
}

pub fn run(config: &Path, first_command: u32) -> Result<()> {
    let configs = load_config(config)?;
    if configs.is_empty() {
        bail!("no links configured in {config:?}");
    }
    let handles = start_links(&configs)?;

    let clock = WallClock;
    let mut router = CommandRouter::new(
        Arc::new(tmtc::tc::LogCommandHistory),
        Arc::new(clock),
    );
    for commands in handles.iter().filter_map(|h| h.commands.clone()) {
        router.add_link(commands);
    }

    let mut seq = first_command;
    for line in stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line, seq, clock.now()) {
            Ok(command) => {
                router.route(command);
                seq = seq.wrapping_add(1);
            }
            Err(err) => warn!("skipping command: {err:#}"),
        }
    }

    info!("stdin closed, stopping links");
    for handle in &handles {
        handle.link.disable();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_commands() {
        let now = hifitime::Epoch::from_gregorian_utc_at_midnight(2024, 1, 1);
        let command = parse_command(" 1800c0000001abcd\n", 4, now).unwrap();
        assert_eq!(command.binary, vec![0x18, 0x00, 0xc0, 0x00, 0x00, 0x01, 0xab, 0xcd]);
        assert_eq!(command.id.sequence_number, 4);
        assert!(parse_command("not hex", 5, now).is_err());
    }

    #[test]
    fn loads_link_list() {
        let configs: Vec<LinkConfig> = serde_json::from_str(
            r#"[{"name": "tm", "type": "UDP_TM", "port": 10015},
                {"name": "tc", "type": "TCP_TC", "host": "localhost", "port": 10025}]"#,
        )
        .unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].name, "tc");
    }
}
