//! csi-capture CLI
//!
//! Command-line front end for the `csi-capture` decoders.
//!
//! # Usage
//!
//! ```bash
//! # Decode a whole capture and summarize it
//! csi-capture info walk.dat --device intel
//!
//! # Print the byte offsets a seek may start at
//! csi-capture index rx.pcap --device nexmon
//!
//! # Report PicoScenes sub-field demand against the configured capacities
//! csi-capture check rx_by_usrpN210.csi --config capacities.json
//!
//! # Decode records arriving over UDP
//! csi-capture listen --bind 127.0.0.1:10011 --device esp32
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use csi_capture::DeviceKind;

pub mod commands;

/// CSI capture inspection and real-time ingestion
#[derive(Parser, Debug)]
#[command(name = "csi-capture")]
#[command(author, version, about = "Decode WiFi CSI captures from common capture tools")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a capture and summarize its records
    Info(InfoArgs),

    /// Print the record boundaries of a capture
    Index(IndexArgs),

    /// Walk a PicoScenes capture and report capacity usage
    Check(CheckArgs),

    /// Decode records received on a UDP socket
    Listen(ListenArgs),

    /// Display version information
    Version,
}

/// Device selection shared by the decoding commands.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Capture tool that wrote the data (intel, atheros, atheros_pull10,
    /// nexmon, nexmon_pull46, esp32, picoscenes)
    #[arg(short, long)]
    pub device: Option<DeviceKind>,

    /// JSON session configuration; overrides the device defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Capture file
    pub file: PathBuf,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Emit the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the index command
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Capture file
    pub file: PathBuf,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// PicoScenes capture file
    pub file: PathBuf,

    /// JSON session configuration with the PicoScenes capacities
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the listen command
#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address:port to bind the UDP listener to
    #[arg(long, default_value = "127.0.0.1:10011")]
    pub bind: String,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Largest datagram accepted, in bytes
    #[arg(long, default_value = "65535")]
    pub max_datagram: usize,
}
