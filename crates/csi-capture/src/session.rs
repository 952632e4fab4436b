//! Parse sessions: bulk reads, random access and real-time ingestion.
//!
//! A [`ParseSession`] owns a validated [`SessionConfig`] and the records
//! decoded from the last read. Bulk reads size the store up front from
//! [`ExpectedCount`], skip records that fail to decode, and stop cleanly
//! at a truncated tail.
//!
//! # Example
//!
//! ```rust,no_run
//! use csi_capture::config::{DeviceKind, SessionConfig};
//! use csi_capture::session::ParseSession;
//!
//! let mut session = ParseSession::new(SessionConfig::for_kind(DeviceKind::Intel))?;
//! let summary = session.read_file("capture.dat".as_ref())?;
//! println!("{} records, {} skipped", summary.count, summary.skipped);
//! # Ok::<(), csi_capture::error::CsiError>(())
//! ```

use std::path::{Path, PathBuf};

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bits::{ByteCursor, Endian};
use crate::config::{AtherosConfig, DeviceConfig, DeviceKind, ExpectedCount, SessionConfig};
use crate::decoder::atheros::pull10_endian;
use crate::decoder::picoscenes::CapacityUsage;
use crate::decoder::{
    AtherosDecoder, AtherosRecord, Esp32Decoder, Esp32Record, IntelDecoder, IntelRecord,
    NexmonDecoder, NexmonRecord, PicoScenesDecoder, PicoScenesRecord,
};
use crate::error::{CsiError, CsiResult};
use crate::framing::pcap::{count_nexmon, PcapHeader, PcapRecords, GLOBAL_HEADER_LEN};
use crate::framing::segment::PicoFrames;
use crate::framing::{
    AtherosFrames, IntelFrames, Lines, ATHEROS_CODE, ESP32_CODE, INTEL_CODE_CSI, INTEL_CODE_MAC,
    NEXMON_CODE, NEXMON_PULL46_CODE, PICOSCENES_CODE,
};
use crate::grouping::group_spatial_streams;
use crate::store::{RecordSet, RecordStore};
use crate::transform::{scaled_csi_in_place, scaled_csi_sm_in_place};

/// Bytes per Intel record assumed when sizing a store.
const INTEL_BYTES_PER_RECORD: usize = 95;
/// Bytes per Atheros record assumed when sizing a store.
const ATHEROS_BYTES_PER_RECORD: usize = 420;
/// Shortest nexmon UDP payload that can hold a frame header.
const NEXMON_HEADER_LEN: usize = 18;

/// Outcome of a bulk read or seek.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSummary {
    /// Records decoded and stored.
    pub count: usize,
    /// Records skipped because they failed to decode.
    pub skipped: usize,
    /// Whether the capture ended inside a record.
    pub truncated: bool,
}

/// Result of [`ParseSession::decode_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A record of the given status code was decoded.
    Decoded(u16),
    /// The buffer does not hold a record of the session's device.
    NotRecognized,
    /// The buffer holds a record that failed to decode.
    Malformed,
}

impl DecodeStatus {
    /// Status code of a decoded record, 0 otherwise.
    pub fn code(self) -> u16 {
        match self {
            Self::Decoded(code) => code,
            Self::NotRecognized | Self::Malformed => 0,
        }
    }
}

/// PicoScenes capacity report produced by [`ParseSession::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Frames walked.
    pub frames: usize,
    /// Frames that failed to decode.
    pub failed: usize,
    /// Whether the capture ended inside a frame.
    pub truncated: bool,
    /// Per sub-field demand against the configured capacities.
    pub usage: CapacityUsage,
}

/// Decoders resolved once from the configuration.
#[derive(Debug, Clone)]
enum Decoders {
    Intel(IntelDecoder),
    Atheros { config: AtherosConfig, pull10: bool },
    Nexmon(NexmonDecoder),
    Esp32(Esp32Decoder),
    PicoScenes(PicoScenesDecoder),
}

/// A configured decoding session and the records it holds.
#[derive(Debug, Clone)]
pub struct ParseSession {
    config: SessionConfig,
    decoders: Decoders,
    records: RecordSet,
    summary: ReadSummary,
}

impl ParseSession {
    /// Validate `config` and create an empty session.
    ///
    /// Fails with `InvalidConfiguration` for bad capacities and with
    /// `UnsupportedVariant` for an unknown nexmon chip.
    pub fn new(config: SessionConfig) -> CsiResult<Self> {
        config.validate()?;
        let decoders = match &config.device {
            DeviceConfig::Intel(c) => Decoders::Intel(IntelDecoder::new(c.clone())),
            DeviceConfig::Atheros(c) => Decoders::Atheros {
                config: c.clone(),
                pull10: false,
            },
            DeviceConfig::AtherosPull10(c) => Decoders::Atheros {
                config: c.clone(),
                pull10: true,
            },
            DeviceConfig::Nexmon(c) => Decoders::Nexmon(NexmonDecoder::new(c, false)?),
            DeviceConfig::NexmonPull46(c) => Decoders::Nexmon(NexmonDecoder::new(c, true)?),
            DeviceConfig::Esp32(c) => Decoders::Esp32(Esp32Decoder::new(c.clone())),
            DeviceConfig::PicoScenes(c) => {
                Decoders::PicoScenes(PicoScenesDecoder::new(c.clone()))
            }
        };
        let records = RecordSet::with_capacity(config.device.kind(), 0)?;
        debug!(device = %config.device.kind(), "parse session created");
        Ok(Self {
            config,
            decoders,
            records,
            summary: ReadSummary::default(),
        })
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The configured device kind.
    pub fn kind(&self) -> DeviceKind {
        self.config.device.kind()
    }

    /// Records decoded by the last read.
    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    /// Mutable access to the decoded records.
    pub fn records_mut(&mut self) -> &mut RecordSet {
        &mut self.records
    }

    /// Take the decoded records, leaving the session empty.
    pub fn take_records(&mut self) -> CsiResult<RecordSet> {
        let empty = RecordSet::with_capacity(self.kind(), 0)?;
        Ok(std::mem::replace(&mut self.records, empty))
    }

    /// Number of decoded records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the session holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Summary of the last bulk read or seek.
    pub fn summary(&self) -> ReadSummary {
        self.summary
    }

    /// Decode every record in `data`.
    pub fn read(&mut self, data: &[u8]) -> CsiResult<ReadSummary> {
        self.seek(data, 0, 0)
    }

    /// Decode every record of the file at `path`.
    pub fn read_file(&mut self, path: &Path) -> CsiResult<ReadSummary> {
        let data = read_capture(path)?;
        info!("Reading {} capture {}", self.kind(), path.display());
        self.read(&data)
    }

    /// Decode up to `num` records starting at byte `offset` (0 for all).
    ///
    /// `offset` must be a record boundary as returned by
    /// [`boundaries`](Self::boundaries). Offsets inside a container header
    /// (pcap global header, pull-10 marker) are moved to the first record.
    pub fn seek(&mut self, data: &[u8], offset: usize, num: usize) -> CsiResult<ReadSummary> {
        if offset > data.len() {
            return Err(CsiError::invalid_config(
                "offset",
                format!("{offset} is past the end of a {} byte capture", data.len()),
            ));
        }
        self.records.clear();
        self.summary = ReadSummary::default();

        let (records, summary, _) = self.decode_from(data, offset, num)?;
        self.records = records;
        self.records.shrink_to_fit();
        self.summary = summary;
        info!(
            device = %self.kind(),
            count = summary.count,
            skipped = summary.skipped,
            truncated = summary.truncated,
            "bulk read finished"
        );
        Ok(summary)
    }

    /// [`seek`](Self::seek) over the file at `path`.
    pub fn seek_file(&mut self, path: &Path, offset: usize, num: usize) -> CsiResult<ReadSummary> {
        let data = read_capture(path)?;
        self.seek(&data, offset, num)
    }

    /// Byte offsets at which [`seek`](Self::seek) can start.
    ///
    /// Entry `i` is where `read()` record `i` begins, so records skipped by
    /// a bulk read have no entry. An Intel record that carries a MAC header
    /// starts at its `0xc1` frame.
    pub fn boundaries(&self, data: &[u8]) -> CsiResult<Vec<usize>> {
        let (_, _, offsets) = self.decode_from(data, 0, 0)?;
        Ok(offsets)
    }

    /// Run one bulk pass from `offset`, returning the records, the summary
    /// and the start offset of every record kept.
    fn decode_from(
        &self,
        data: &[u8],
        offset: usize,
        num: usize,
    ) -> CsiResult<(RecordSet, ReadSummary, Vec<usize>)> {
        let expected = self.config.expected_count;
        Ok(match &self.decoders {
            Decoders::Intel(decoder) => {
                let mut decoder = decoder.clone();
                decoder.reset();
                let pass = read_intel(&mut decoder, data, offset, num, expected)?;
                (RecordSet::Intel(pass.store), pass.summary, pass.offsets)
            }
            Decoders::Atheros { config, pull10 } => {
                let pass = read_atheros(config, *pull10, data, offset, num, expected)?;
                (RecordSet::Atheros(pass.store), pass.summary, pass.offsets)
            }
            Decoders::Nexmon(decoder) => {
                let pass = read_nexmon(decoder, data, offset, num, expected)?;
                (RecordSet::Nexmon(pass.store), pass.summary, pass.offsets)
            }
            Decoders::Esp32(decoder) => {
                let pass = read_esp32(decoder, data, offset, num, expected)?;
                (RecordSet::Esp32(pass.store), pass.summary, pass.offsets)
            }
            Decoders::PicoScenes(decoder) => {
                let pass = read_picoscenes(decoder, data, offset, num, expected)?;
                (RecordSet::PicoScenes(pass.store), pass.summary, pass.offsets)
            }
        })
    }

    /// Decode a single record received in real time.
    ///
    /// On success the store holds exactly that record. An Intel `0xc1`
    /// header is remembered and attached to the next `0xbb` record.
    pub fn decode_one(&mut self, data: &[u8]) -> DecodeStatus {
        let outcome = match &mut self.decoders {
            Decoders::Intel(decoder) => match IntelFrames::new(data, 0).next() {
                None => return DecodeStatus::NotRecognized,
                Some(Err(e)) => Err(e),
                Some(Ok(frame)) => match frame.code {
                    INTEL_CODE_MAC | INTEL_CODE_CSI => match decoder.feed(&frame) {
                        Ok(Some(record)) => single(record).map(|s| (RecordSet::Intel(s), frame.code)),
                        Ok(None) => return DecodeStatus::Decoded(INTEL_CODE_MAC),
                        Err(e) => Err(e),
                    },
                    _ => return DecodeStatus::NotRecognized,
                },
            },
            Decoders::Atheros { config, .. } => {
                let decoder = AtherosDecoder::new(config.clone(), config.endian);
                match AtherosFrames::new(data, 0, config.endian).next() {
                    None => return DecodeStatus::NotRecognized,
                    Some(frame) => frame
                        .and_then(|f| decoder.decode(&f))
                        .and_then(single)
                        .map(|s| (RecordSet::Atheros(s), ATHEROS_CODE)),
                }
            }
            Decoders::Nexmon(decoder) => {
                if data.len() < NEXMON_HEADER_LEN {
                    return DecodeStatus::NotRecognized;
                }
                let code = if decoder.is_pull46() {
                    NEXMON_PULL46_CODE
                } else {
                    NEXMON_CODE
                };
                decoder
                    .decode_udp(data, 0)
                    .and_then(single)
                    .map(|s| (RecordSet::Nexmon(s), code))
            }
            Decoders::Esp32(decoder) => {
                let Some(line) = Lines::new(data, 0).find(|f| decoder.is_record(f.payload)) else {
                    return DecodeStatus::NotRecognized;
                };
                decoder
                    .decode(&line)
                    .and_then(single)
                    .map(|s| (RecordSet::Esp32(s), ESP32_CODE))
            }
            Decoders::PicoScenes(decoder) => match PicoFrames::new(data, 0).next() {
                None => return DecodeStatus::NotRecognized,
                Some(frame) => {
                    let mut usage = CapacityUsage::new(decoder.config());
                    frame
                        .and_then(|f| decoder.decode(&f, &mut usage))
                        .and_then(single)
                        .map(|s| (RecordSet::PicoScenes(s), PICOSCENES_CODE))
                }
            },
        };

        match outcome {
            Ok((records, code)) => {
                self.records = records;
                self.summary = ReadSummary {
                    count: 1,
                    ..ReadSummary::default()
                };
                DecodeStatus::Decoded(code)
            }
            Err(e) => {
                debug!(error = %e, "real-time record rejected");
                DecodeStatus::Malformed
            }
        }
    }

    /// Walk a PicoScenes capture and report each sub-field's demand
    /// against the configured capacities.
    pub fn check(&self, data: &[u8]) -> CsiResult<CheckReport> {
        let Decoders::PicoScenes(decoder) = &self.decoders else {
            return Err(CsiError::invalid_config(
                "device",
                format!("capacity check needs a PicoScenes session, not {}", self.kind()),
            ));
        };
        let mut report = CheckReport {
            frames: 0,
            failed: 0,
            truncated: false,
            usage: CapacityUsage::new(decoder.config()),
        };
        for frame in PicoFrames::new(data, 0) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if e.is_truncation() => {
                    report.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            report.frames += 1;
            if let Err(e) = decoder.decode(&frame, &mut report.usage) {
                debug!(offset = frame.offset, error = %e, "frame failed during check");
                report.failed += 1;
            }
        }
        info!(
            frames = report.frames,
            skipped = report.usage.total_skipped(),
            "capacity check finished"
        );
        Ok(report)
    }

    /// [`check`](Self::check) over the file at `path`.
    pub fn check_file(&self, path: &Path) -> CsiResult<CheckReport> {
        let data = read_capture(path)?;
        self.check(&data)
    }

    /// Group nexmon records into `[frame, core, spatial]` record indices.
    pub fn group(&self, core_count: usize, spatial_count: usize) -> CsiResult<Array3<usize>> {
        let store = self.records.as_nexmon().ok_or_else(|| {
            CsiError::invalid_config(
                "device",
                format!("spatial grouping needs a nexmon session, not {}", self.kind()),
            )
        })?;
        let seq: Vec<u16> = store.iter().map(|r| r.seq).collect();
        let core: Vec<u8> = store.iter().map(|r| r.core).collect();
        let spatial: Vec<u8> = store.iter().map(|r| r.spatial).collect();
        group_spatial_streams(&seq, &core, &spatial, core_count, spatial_count)
    }

    /// Read host timestamps from the `.datstp` file beside `capture`.
    ///
    /// The companion holds a `u32` second and `u32` microsecond pair per
    /// record. Records are stamped in order and the first timestamp is
    /// returned.
    pub fn readstp(&mut self, capture: &Path, endian: Endian) -> CsiResult<f64> {
        let path = stp_path(capture);
        let data = std::fs::read(&path).map_err(|e| CsiError::io(&path, e))?;
        let mut cursor = ByteCursor::new(&data);
        let mut stamps = Vec::with_capacity(data.len() / 8);
        while cursor.remaining() >= 8 {
            let sec = cursor.read_u32(endian)?;
            let usec = cursor.read_u32(endian)?;
            stamps.push(f64::from(sec) + f64::from(usec) * 1e-6);
        }
        let Some(&first) = stamps.first() else {
            return Err(CsiError::truncated(0, 8, data.len()));
        };

        let kind = self.kind();
        match &mut self.records {
            RecordSet::Intel(store) => {
                for (record, stp) in store.iter_mut().zip(&stamps) {
                    record.stp = Some(*stp);
                }
            }
            RecordSet::Atheros(store) => {
                for (record, stp) in store.iter_mut().zip(&stamps) {
                    record.stp = Some(*stp);
                }
            }
            _ => {
                return Err(CsiError::invalid_config(
                    "device",
                    format!("timestamp files exist only for Intel and Atheros, not {kind}"),
                ))
            }
        }
        if stamps.len() != self.records.len() {
            warn!(
                stamps = stamps.len(),
                records = self.records.len(),
                "timestamp count differs from record count"
            );
        }
        Ok(first)
    }

    /// Scale every Intel record in place, optionally removing the spatial
    /// mapping too. Returns the number of records processed.
    pub fn scale_in_place(&mut self, remove_spatial_mapping: bool) -> CsiResult<usize> {
        let kind = self.kind();
        let store = self.records.as_intel_mut().ok_or_else(|| {
            CsiError::invalid_config("device", format!("CSI scaling needs an Intel session, not {kind}"))
        })?;
        for record in store.iter_mut() {
            if remove_spatial_mapping {
                scaled_csi_sm_in_place(record)?;
            } else {
                scaled_csi_in_place(record);
            }
        }
        Ok(store.len())
    }
}

fn read_capture(path: &Path) -> CsiResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CsiError::io(path, e))
}

fn stp_path(capture: &Path) -> PathBuf {
    capture.with_extension("datstp")
}

fn single<R>(record: R) -> CsiResult<RecordStore<R>> {
    let mut store = RecordStore::with_capacity(1)?;
    store.push(record)?;
    Ok(store)
}

fn initial_capacity(expected: ExpectedCount, heuristic: impl FnOnce() -> usize, num: usize) -> usize {
    let capacity = match expected {
        ExpectedCount::Exact(n) => n,
        ExpectedCount::Heuristic => heuristic(),
    };
    if num > 0 {
        capacity.min(num)
    } else {
        capacity
    }
}

/// Whether a bulk read may skip a record that failed with `err`.
///
/// `UnsupportedVariant` is never skipped: an unknown sub-format fails the
/// whole read.
fn skippable(err: &CsiError) -> bool {
    err.is_recoverable() || err.is_truncation()
}

/// Records of one bulk pass with the offset each one starts at.
struct Pass<R> {
    store: RecordStore<R>,
    summary: ReadSummary,
    offsets: Vec<usize>,
}

/// Accumulates records of one bulk read.
struct Collector<R> {
    store: RecordStore<R>,
    offsets: Vec<usize>,
    summary: ReadSummary,
    limit: usize,
}

impl<R> Collector<R> {
    fn new(capacity: usize, limit: usize) -> CsiResult<Self> {
        Ok(Self {
            store: RecordStore::with_capacity(capacity)?,
            offsets: Vec::with_capacity(capacity),
            summary: ReadSummary::default(),
            limit,
        })
    }

    fn is_full(&self) -> bool {
        self.limit != 0 && self.store.len() >= self.limit
    }

    fn push(&mut self, offset: usize, record: R) -> CsiResult<()> {
        self.store.push(record)?;
        self.offsets.push(offset);
        Ok(())
    }

    fn accept(&mut self, offset: usize, result: CsiResult<R>) -> CsiResult<()> {
        match result {
            Ok(record) => self.push(offset, record),
            Err(e) => self.skip(offset, e),
        }
    }

    fn skip(&mut self, offset: usize, err: CsiError) -> CsiResult<()> {
        if !skippable(&err) {
            return Err(err);
        }
        warn!(offset, error = %err, "skipping record");
        self.summary.skipped += 1;
        Ok(())
    }

    /// Handle an error from a framer. Truncation ends the read.
    fn framing_error(&mut self, err: CsiError) -> CsiResult<()> {
        if err.is_truncation() {
            debug!(error = %err, "capture ends inside a record");
            self.summary.truncated = true;
            return Ok(());
        }
        let offset = match &err {
            CsiError::Malformed { offset, .. } => *offset,
            _ => 0,
        };
        self.skip(offset, err)
    }

    fn finish(self) -> Pass<R> {
        let summary = ReadSummary {
            count: self.store.len(),
            ..self.summary
        };
        Pass {
            store: self.store,
            summary,
            offsets: self.offsets,
        }
    }
}

fn read_intel(
    decoder: &mut IntelDecoder,
    data: &[u8],
    offset: usize,
    num: usize,
    expected: ExpectedCount,
) -> CsiResult<Pass<IntelRecord>> {
    let body = &data[offset..];
    let capacity = initial_capacity(expected, || body.len() / INTEL_BYTES_PER_RECORD, num);
    let mut out = Collector::new(capacity, num)?;
    // Offset of the `0xc1` frame the decoder is holding.
    let mut mac_offset = None;
    for frame in IntelFrames::new(body, offset) {
        if out.is_full() {
            break;
        }
        match frame {
            Ok(frame) => match decoder.feed(&frame) {
                Ok(Some(record)) => {
                    let start = mac_offset
                        .take()
                        .filter(|_| record.mac.is_some())
                        .unwrap_or(frame.offset);
                    out.push(start, record)?;
                }
                Ok(None) if frame.code == INTEL_CODE_MAC => mac_offset = Some(frame.offset),
                Ok(None) => {}
                Err(e) => {
                    if frame.code == INTEL_CODE_CSI {
                        mac_offset = None;
                    }
                    out.skip(frame.offset, e)?;
                }
            },
            Err(e) => out.framing_error(e)?,
        }
    }
    Ok(out.finish())
}

/// First record offset and byte order of an Atheros capture.
fn atheros_layout(config: &AtherosConfig, pull10: bool, data: &[u8]) -> (usize, Endian) {
    if pull10 {
        let endian = data.first().copied().map_or(Endian::Little, pull10_endian);
        (1.min(data.len()), endian)
    } else {
        (0, config.endian)
    }
}

fn read_atheros(
    config: &AtherosConfig,
    pull10: bool,
    data: &[u8],
    offset: usize,
    num: usize,
    expected: ExpectedCount,
) -> CsiResult<Pass<AtherosRecord>> {
    let (first, endian) = atheros_layout(config, pull10, data);
    let start = offset.max(first);
    let body = &data[start..];
    let decoder = AtherosDecoder::new(config.clone(), endian);
    let capacity = initial_capacity(expected, || body.len() / ATHEROS_BYTES_PER_RECORD, num);
    let mut out = Collector::new(capacity, num)?;
    for frame in AtherosFrames::new(body, start, endian) {
        if out.is_full() {
            break;
        }
        match frame {
            Ok(frame) => out.accept(frame.offset, decoder.decode(&frame))?,
            Err(e) => out.framing_error(e)?,
        }
    }
    Ok(out.finish())
}

fn read_nexmon(
    decoder: &NexmonDecoder,
    data: &[u8],
    offset: usize,
    num: usize,
    expected: ExpectedCount,
) -> CsiResult<Pass<NexmonRecord>> {
    let header = PcapHeader::parse(data)?;
    let start = offset.max(GLOBAL_HEADER_LEN).min(data.len());
    let body = &data[start..];
    let capacity = initial_capacity(expected, || count_nexmon(body, start, &header), num);
    let mut out = Collector::new(capacity, num)?;
    for record in PcapRecords::new(body, start, &header) {
        if out.is_full() {
            break;
        }
        match record {
            Ok(record) if record.is_nexmon() => {
                out.accept(record.offset, decoder.decode_pcap(&record))?;
            }
            Ok(record) => debug!(offset = record.offset, "pcap record without nexmon marker"),
            Err(e) => out.framing_error(e)?,
        }
    }
    Ok(out.finish())
}

fn read_esp32(
    decoder: &Esp32Decoder,
    data: &[u8],
    offset: usize,
    num: usize,
    expected: ExpectedCount,
) -> CsiResult<Pass<Esp32Record>> {
    let body = &data[offset..];
    let capacity = initial_capacity(expected, || Lines::new(body, offset).count(), num);
    let mut out = Collector::new(capacity, num)?;
    for line in Lines::new(body, offset) {
        if out.is_full() {
            break;
        }
        if !decoder.is_record(line.payload) {
            debug!(offset = line.offset, "not a CSI row");
            continue;
        }
        out.accept(line.offset, decoder.decode(&line))?;
    }
    Ok(out.finish())
}

fn read_picoscenes(
    decoder: &PicoScenesDecoder,
    data: &[u8],
    offset: usize,
    num: usize,
    expected: ExpectedCount,
) -> CsiResult<Pass<PicoScenesRecord>> {
    let body = &data[offset..];
    let capacity = initial_capacity(
        expected,
        || PicoFrames::new(body, offset).map_while(Result::ok).count(),
        num,
    );
    let mut out = Collector::new(capacity, num)?;
    let mut usage = CapacityUsage::new(decoder.config());
    for frame in PicoFrames::new(body, offset) {
        if out.is_full() {
            break;
        }
        match frame {
            Ok(frame) => out.accept(frame.offset, decoder.decode(&frame, &mut usage))?,
            Err(e) => out.framing_error(e)?,
        }
    }
    if usage.total_skipped() > 0 {
        info!(
            skipped = usage.total_skipped(),
            "sub-fields larger than the configured capacity were dropped"
        );
    }
    Ok(out.finish())
}
