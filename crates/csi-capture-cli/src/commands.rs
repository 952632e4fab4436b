//! Command execution.
//!
//! Each command builds a [`ParseSession`] from `--device` and `--config`,
//! runs it over a capture file or a UDP socket, and prints to stdout.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csi_capture::decoder::picoscenes::PicoField;
use csi_capture::framing::INTEL_CODE_MAC;
use csi_capture::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{CheckArgs, Commands, IndexArgs, InfoArgs, ListenArgs, SessionArgs};

/// Summary printed by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    /// Capture that was decoded.
    pub file: PathBuf,
    /// Device the session decoded it as.
    pub device: DeviceKind,
    /// Counts from the bulk read.
    #[serde(flatten)]
    pub summary: ReadSummary,
    /// Shape of every CSI tensor, `[subcarrier, rx, tx]`.
    pub csi_shape: [usize; 3],
    /// One-line description of the first record.
    pub first: Option<String>,
}

/// Execute a top-level command
pub fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Info(args) => execute_info(args),
        Commands::Index(args) => execute_index(args),
        Commands::Check(args) => execute_check(args),
        Commands::Listen(args) => execute_listen(args),
        Commands::Version => {
            println!("csi-capture {}", env!("CARGO_PKG_VERSION"));
            println!("decoder library version: {}", csi_capture::VERSION);
            Ok(())
        }
    }
}

/// Resolve the session configuration from `--device` and `--config`.
///
/// A configuration file wins; `--device`, when also given, must agree with
/// it.
pub fn load_config(args: &SessionArgs) -> Result<SessionConfig> {
    match (&args.config, args.device) {
        (Some(path), device) => {
            let config = SessionConfig::from_json(path)
                .with_context(|| format!("loading session config {}", path.display()))?;
            if let Some(device) = device {
                if device != config.device.kind() {
                    bail!(
                        "--device {device} disagrees with {} in {}",
                        config.device.kind(),
                        path.display()
                    );
                }
            }
            Ok(config)
        }
        (None, Some(device)) => Ok(SessionConfig::for_kind(device)),
        (None, None) => bail!("either --device or --config is required"),
    }
}

fn open_session(args: &SessionArgs) -> Result<ParseSession> {
    let config = load_config(args)?;
    ParseSession::new(config).context("invalid session configuration")
}

/// Decode `file` in full and summarize it.
pub fn info(file: &Path, args: &SessionArgs) -> Result<InfoReport> {
    let mut session = open_session(args)?;
    let summary = session
        .read_file(file)
        .with_context(|| format!("decoding {}", file.display()))?;
    let (tones, rx, tx) = session.config().device.csi_shape();
    Ok(InfoReport {
        file: file.to_path_buf(),
        device: session.kind(),
        summary,
        csi_shape: [tones, rx, tx],
        first: record_line(session.records(), 0),
    })
}

fn execute_info(args: InfoArgs) -> Result<()> {
    let report = info(&args.file, &args.session)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File:      {}", report.file.display());
    println!("Device:    {}", report.device);
    println!("Records:   {}", report.summary.count);
    println!("Skipped:   {}", report.summary.skipped);
    if report.summary.truncated {
        println!("Truncated: yes (last record incomplete)");
    }
    let [tones, rx, tx] = report.csi_shape;
    println!("CSI shape: {tones} x {rx} x {tx}");
    if let Some(first) = &report.first {
        println!("First:     {first}");
    }
    Ok(())
}

fn execute_index(args: IndexArgs) -> Result<()> {
    let session = open_session(&args.session)?;
    let data = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let offsets = session
        .boundaries(&data)
        .with_context(|| format!("scanning {}", args.file.display()))?;
    for (i, offset) in offsets.iter().enumerate() {
        println!("{i}\t{offset}");
    }
    info!(records = offsets.len(), "boundary scan finished");
    Ok(())
}

/// Run the PicoScenes capacity check over `file`.
pub fn check(file: &Path, config: Option<&Path>) -> Result<CheckReport> {
    let session_args = SessionArgs {
        device: Some(DeviceKind::PicoScenes),
        config: config.map(Path::to_path_buf),
    };
    let session = open_session(&session_args)?;
    session
        .check_file(file)
        .with_context(|| format!("checking {}", file.display()))
}

fn execute_check(args: CheckArgs) -> Result<()> {
    let report = check(&args.file, args.config.as_deref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Frames: {} ({} failed)", report.frames, report.failed);
    println!(
        "{:<16} {:>16} {:>16} {:>16} {:>8} {:>8}",
        "field", "configured", "min", "max", "seen", "skipped"
    );
    for field in PicoField::ALL {
        let usage = report.usage.field(field);
        println!(
            "{:<16} {:>16} {:>16} {:>16} {:>8} {:>8}",
            field.name(),
            format_dims(Some(usage.configured)),
            format_dims(usage.min),
            format_dims(usage.max),
            usage.seen,
            usage.skipped
        );
    }
    if report.usage.total_skipped() > 0 {
        warn!(
            skipped = report.usage.total_skipped(),
            "some sub-fields exceed their capacity; raise them in the config"
        );
    }
    Ok(())
}

fn format_dims(dims: Option<[usize; 3]>) -> String {
    match dims {
        Some([a, 1, 1]) => a.to_string(),
        Some([a, b, c]) => format!("{a}x{b}x{c}"),
        None => "-".to_string(),
    }
}

fn execute_listen(args: ListenArgs) -> Result<()> {
    let mut session = open_session(&args.session)?;
    let socket = UdpSocket::bind(&args.bind)
        .with_context(|| format!("cannot bind to {}", args.bind))?;
    info!(bind = %args.bind, device = %session.kind(), "listening");

    let mut buf = vec![0u8; args.max_datagram];
    loop {
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "recv failed");
                continue;
            }
        };
        debug!(bytes = n, %src, "datagram received");

        match session.decode_one(&buf[..n]) {
            DecodeStatus::Decoded(INTEL_CODE_MAC) => {
                debug!("MAC header held for the next record");
            }
            DecodeStatus::Decoded(_) => {
                if let Some(line) = record_line(session.records(), 0) {
                    println!("{line}");
                }
            }
            DecodeStatus::NotRecognized => debug!(bytes = n, %src, "not a CSI record"),
            DecodeStatus::Malformed => debug!(bytes = n, %src, "malformed record dropped"),
        }
    }
}

fn mean_amplitude<R: CsiRecord>(record: &R) -> f64 {
    let csi = record.csi();
    if csi.is_empty() {
        return 0.0;
    }
    csi.iter().map(|c| c.norm()).sum::<f64>() / csi.len() as f64
}

/// One-line description of record `index`.
pub fn record_line(records: &RecordSet, index: usize) -> Option<String> {
    let line = match records {
        RecordSet::Intel(store) => {
            let r = store.get(index)?;
            format!(
                "[intel bfee:{}] nrx={} ntx={} rssi={}/{}/{} rss={:.1}dBm amp={:.1}",
                r.bfee_count,
                r.nrx,
                r.ntx,
                r.rssi_a,
                r.rssi_b,
                r.rssi_c,
                total_rss(r),
                mean_amplitude(r)
            )
        }
        RecordSet::Atheros(store) => {
            let r = store.get(index)?;
            format!(
                "[atheros ts:{}] channel={} tones={} nr={} nc={} rssi={} amp={:.1}",
                r.timestamp,
                r.tx_channel,
                r.num_tones,
                r.nr,
                r.nc,
                r.rssi,
                mean_amplitude(r)
            )
        }
        RecordSet::Nexmon(store) => {
            let r = store.get(index)?;
            let rssi = r.rssi.map_or_else(|| "-".to_string(), |v| v.to_string());
            format!(
                "[nexmon seq:{}] core={} spatial={} chanspec={:#06x} rssi={} amp={:.1}",
                r.seq,
                r.core,
                r.spatial,
                r.chan_spec,
                rssi,
                mean_amplitude(r)
            )
        }
        RecordSet::Esp32(store) => {
            let r = store.get(index)?;
            format!(
                "[esp32 {}] rssi={} channel={} len={} amp={:.1}",
                if r.mac.is_empty() { "-" } else { r.mac.as_str() },
                r.rssi,
                r.channel,
                r.len,
                mean_amplitude(r)
            )
        }
        RecordSet::PicoScenes(store) => {
            let r = store.get(index)?;
            format!(
                "[picoscenes seq:{}] device={:#06x} cbw={} rssi={} tones={} amp={:.1}",
                r.mac_header.seq,
                r.basic.device_type,
                r.basic.cbw,
                r.basic.rssi,
                r.csi.info.num_tones,
                mean_amplitude(r)
            )
        }
    };
    Some(line)
}
