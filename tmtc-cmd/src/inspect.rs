use std::{
    fs::File,
    io::{stdout, BufReader, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use hifitime::Epoch;
use tmtc::{
    events::{EventProducer, LogEventProducer, RateLimitedEventProducer},
    spacepacket::SequenceCounters,
    stream::{PacketInputConfig, PacketInputStream},
    timecode::{TimeService, WallClock},
    tm::{Preprocessed, PreprocessorConfig, Summary, TmPacket},
};
use tracing::debug;

/// How `inspect` prints its summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Pretty printed JSON
    Json,
    /// One line per APID
    Text,
}

fn parse_or_default<T>(json: Option<&str>, what: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match json {
        Some(s) => serde_json::from_str(s).with_context(|| format!("parsing {what}")),
        None => Ok(T::default()),
    }
}

fn summarize(
    input: &Path,
    framing: &PacketInputConfig,
    preprocessor: &PreprocessorConfig,
) -> Result<Summary> {
    let file = File::open(input).with_context(|| format!("opening {input:?}"))?;
    let source = input.display().to_string();
    let events = RateLimitedEventProducer::new(
        LogEventProducer,
        RateLimitedEventProducer::<LogEventProducer>::DEFAULT_INTERVAL,
    );
    let preprocessor = preprocessor
        .build(
            &source,
            Arc::new(events) as Arc<dyn EventProducer>,
            SequenceCounters::new(),
        )
        .context("invalid preprocessor")?;
    let stream = framing
        .build(BufReader::new(file))
        .context("invalid framing")?;

    // all packets of a file share one reception time
    let reception_time = WallClock.now();
    let mut summary = Summary::default();
    for packet in stream.packets() {
        let packet = packet.with_context(|| format!("reading packet {}", summary.count + 1))?;
        match preprocessor.process(TmPacket::new(packet, reception_time))? {
            Preprocessed::Packet(packet) => summary.add(&packet),
            Preprocessed::Dropped(reason) => {
                debug!("dropped packet: {reason}");
                summary.add_dropped();
            }
        }
    }
    Ok(summary)
}

fn fmt_time(time: Option<Epoch>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.to_string())
}

fn write_text<W: Write>(mut out: W, input: &Path, summary: &Summary) -> Result<()> {
    writeln!(out, "{}", input.display())?;
    writeln!(
        out,
        "  packets={} bytes={} missing={} corrupted={} dropped={}",
        summary.count, summary.bytes, summary.missing, summary.corrupted, summary.dropped
    )?;
    writeln!(out, "  first={}", fmt_time(summary.first_generation_time))?;
    writeln!(out, "  last={}", fmt_time(summary.last_generation_time))?;
    for (apid, s) in &summary.apids {
        writeln!(
            out,
            "  apid={apid:<5} packets={} bytes={} missing={} corrupted={}",
            s.count, s.bytes, s.missing, s.corrupted
        )?;
    }
    Ok(())
}

pub fn inspect(
    input: &Path,
    framing: Option<&str>,
    preprocessor: Option<&str>,
    format: Format,
) -> Result<()> {
    let framing: PacketInputConfig = parse_or_default(framing, "framing")?;
    let preprocessor: PreprocessorConfig = parse_or_default(preprocessor, "preprocessor")?;
    let summary = summarize(input, &framing, &preprocessor)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &summary)?;
            println!();
        }
        Format::Text => write_text(stdout().lock(), input, &summary)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn format_names() {
        assert_eq!(Format::from_str("json", false), Ok(Format::Json));
        assert_eq!(Format::from_str("TEXT", true), Ok(Format::Text));
        assert!(Format::from_str("yaml", false).is_err());
    }

    #[test]
    fn text_of_empty_summary() {
        let mut out = Vec::new();
        write_text(&mut out, Path::new("empty.bin"), &Summary::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "empty.bin\n  packets=0 bytes=0 missing=0 corrupted=0 dropped=0\n  first=-\n  last=-\n"
        );
    }
}
