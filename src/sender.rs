// Copyright (C) 2026 xup authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io;
use std::marker::PhantomData;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::packet::{BlockKind, PacketError, build_packet};
use crate::protocol::*;
use crate::transport::{Ack, Connection, decode_text};

// ============================================================================
// Configuration
// ============================================================================

/// Timeouts and retry policy for one transfer. Passed in by the driver so
/// tests can run with shortened values.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// How long to wait for any single response byte
    pub response_timeout: Duration,
    /// Attempts allowed per retryable protocol step
    pub retry_budget: u32,
    /// Pause between attempts, regardless of failure cause
    pub retry_backoff: Duration,
    /// Inactivity window when collecting trailing server output
    pub drain_window: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            response_timeout: Duration::from_secs(10),
            retry_budget: MAXRETRANS,
            retry_backoff: Duration::from_secs(1),
            drain_window: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Protocol step at which a transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshake,
    Digest,
    DataChunk(usize),
    Eot,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Handshake => write!(f, "handshake"),
            Stage::Digest => write!(f, "digest packet"),
            Stage::DataChunk(index) => write!(f, "data chunk {}", index),
            Stage::Eot => write!(f, "end of transmission"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("server cancelled the transfer during {0}")]
    Cancelled(Stage),
    #[error("retry budget exhausted during {0}")]
    RetryBudgetExhausted(Stage),
}

// ============================================================================
// Transfer Report
// ============================================================================

/// Result of the optional post-transfer reset exchange.
#[derive(Debug)]
pub struct ResetStatus {
    pub success: bool,
    pub response: String,
}

/// Aggregate outcome of a successful transfer.
#[derive(Debug)]
pub struct UploadReport {
    /// Server text collected after the final acknowledgment
    pub trailing_output: String,
    /// Present only when a reset was requested; its failure is independent
    /// of transfer success since the file is already delivered.
    pub reset: Option<ResetStatus>,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitReady;
pub struct SendDigest;
pub struct SendData;
pub struct SendEot;
pub struct AwaitFinalAck;
pub struct Drain;
pub struct SendReset;
pub struct AwaitResetAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct UploadFsm<'a, State> {
    state: PhantomData<State>,
    conn: &'a mut dyn Connection,
    data: &'a [u8],
    digest: String,
    config: UploadConfig,
    offset: usize,
    seq: u8,
    reset: bool,
    trailing: String,
}

// ============================================================================
// Trait
// ============================================================================

/// Outcome of one FSM step: either the next state or the final report.
pub enum Step<'a> {
    Next(Box<dyn UploadState<'a> + 'a>),
    Done(UploadReport),
}

pub trait UploadState<'a> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> UploadFsm<'a, S> {
    fn transition<T>(self) -> Box<UploadFsm<'a, T>> {
        Box::new(UploadFsm {
            state: PhantomData,
            conn: self.conn,
            data: self.data,
            digest: self.digest,
            config: self.config,
            offset: self.offset,
            seq: self.seq,
            reset: self.reset,
            trailing: self.trailing,
        })
    }

    fn io_error(&self, e: io::Error) -> UploadError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        UploadError::Io(io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name),
        ))
    }
}

// ============================================================================
// Retry Helpers
// ============================================================================

/// Waits for the receiver to signal readiness ('C' or NAK). Every other
/// byte, and every timeout, consumes one attempt; CAN aborts outright.
fn await_ready(
    conn: &mut dyn Connection,
    attempts: u32,
    timeout: Duration,
    backoff: Duration,
) -> Result<(), UploadError> {
    let mut remaining = attempts;
    while remaining > 0 {
        match conn.read_byte(timeout)? {
            Some(CRC_CHR) | Some(NAK) => {
                debug!("receiver ready");
                return Ok(());
            }
            Some(CAN) => return Err(UploadError::Cancelled(Stage::Handshake)),
            Some(byte) => {
                warn!(byte, "unexpected byte while waiting for receiver");
            }
            None => {
                warn!("no response from receiver");
            }
        }
        remaining -= 1;
        if remaining > 0 {
            thread::sleep(backoff);
        }
    }
    Err(UploadError::RetryBudgetExhausted(Stage::Handshake))
}

/// Sends `packet` until it is positively acknowledged, up to the configured
/// retry budget. NAK, an unexpected byte and a timeout all consume one
/// attempt; CAN aborts outright.
fn send_with_retry(
    conn: &mut dyn Connection,
    packet: &[u8],
    stage: Stage,
    config: &UploadConfig,
) -> Result<(), UploadError> {
    let mut remaining = config.retry_budget;
    while remaining > 0 {
        conn.write_all(packet)?;
        match conn.read_ack(config.response_timeout)? {
            Ack::Positive => return Ok(()),
            Ack::Cancel => return Err(UploadError::Cancelled(stage)),
            Ack::Negative => warn!(%stage, "packet rejected, retransmitting"),
            Ack::Unexpected(byte) => warn!(%stage, byte, "unexpected response, retransmitting"),
            Ack::Timeout => warn!(%stage, "no acknowledgment, retransmitting"),
        }
        remaining -= 1;
        if remaining > 0 {
            thread::sleep(config.retry_backoff);
        }
    }
    Err(UploadError::RetryBudgetExhausted(stage))
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> UploadState<'a> for UploadFsm<'a, AwaitReady> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let fsm = *self;
        await_ready(
            &mut *fsm.conn,
            fsm.config.retry_budget,
            fsm.config.response_timeout,
            fsm.config.retry_backoff,
        )?;
        let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<SendDigest>();
        Ok(Step::Next(next))
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, SendDigest> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let mut fsm = *self;
        let packet = build_packet(0, fsm.digest.as_bytes(), BlockKind::Long)?;
        debug!(digest = %fsm.digest, "sending digest packet");
        send_with_retry(&mut *fsm.conn, &packet, Stage::Digest, &fsm.config)?;
        debug!("digest packet acknowledged");
        fsm.seq = 1;
        fsm.offset = 0;
        let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<SendData>();
        Ok(Step::Next(next))
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, SendData> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let mut fsm = *self;
        if fsm.offset >= fsm.data.len() {
            let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<SendEot>();
            return Ok(Step::Next(next));
        }

        let end = (fsm.offset + SHORT_BLOCK_CAPACITY).min(fsm.data.len());
        let chunk = &fsm.data[fsm.offset..end];
        let index = fsm.offset / SHORT_BLOCK_CAPACITY;
        let packet = build_packet(fsm.seq, chunk, BlockKind::Short)?;
        debug!(seq = fsm.seq, bytes = chunk.len(), "sending data chunk");
        send_with_retry(
            &mut *fsm.conn,
            &packet,
            Stage::DataChunk(index),
            &fsm.config,
        )?;

        fsm.offset = end;
        fsm.seq = fsm.seq.wrapping_add(1);
        let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<SendData>();
        Ok(Step::Next(next))
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, SendEot> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let fsm = *self;
        match fsm.conn.write_all(&[EOT]) {
            Ok(()) => {}
            Err(e) => return Err(fsm.io_error(e)),
        }
        debug!("sent EOT");
        let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<AwaitFinalAck>();
        Ok(Step::Next(next))
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, AwaitFinalAck> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let fsm = *self;
        match fsm.conn.read_ack(fsm.config.response_timeout) {
            Ok(Ack::Positive) => {
                info!("upload acknowledged by receiver");
                let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<Drain>();
                Ok(Step::Next(next))
            }
            Ok(Ack::Cancel) => Err(UploadError::Cancelled(Stage::Eot)),
            // EOT is never retried
            Ok(_) => Err(UploadError::RetryBudgetExhausted(Stage::Eot)),
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, Drain> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let mut fsm = *self;
        let bytes = match fsm.conn.read_trailing(fsm.config.drain_window) {
            Ok(bytes) => bytes,
            Err(e) => return Err(fsm.io_error(e)),
        };
        fsm.trailing = decode_text(&bytes);
        if !fsm.trailing.is_empty() {
            info!(output = %fsm.trailing, "server output after upload");
        }

        if fsm.reset {
            let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<SendReset>();
            Ok(Step::Next(next))
        } else {
            Ok(Step::Done(UploadReport {
                trailing_output: fsm.trailing,
                reset: None,
            }))
        }
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, SendReset> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let fsm = *self;
        // Stale protocol bytes would corrupt the text response
        match fsm.conn.drain_input() {
            Ok(()) => {}
            Err(e) => return Err(fsm.io_error(e)),
        }
        info!("sending reset command");
        match fsm.conn.send_line("reset") {
            Ok(()) => {}
            Err(e) => return Err(fsm.io_error(e)),
        }
        let next: Box<dyn UploadState<'a> + 'a> = fsm.transition::<AwaitResetAck>();
        Ok(Step::Next(next))
    }
}

impl<'a> UploadState<'a> for UploadFsm<'a, AwaitResetAck> {
    fn step(self: Box<Self>) -> Result<Step<'a>, UploadError> {
        let fsm = *self;
        let response = match fsm.conn.read_line_or_silence(fsm.config.response_timeout) {
            Ok(response) => response,
            Err(e) => return Err(fsm.io_error(e)),
        };
        let success = response.contains("Rebooting");
        if success {
            info!(%response, "reset acknowledged");
        } else {
            warn!(%response, "reset not acknowledged");
        }
        Ok(Step::Done(UploadReport {
            trailing_output: fsm.trailing,
            reset: Some(ResetStatus { success, response }),
        }))
    }
}

// ============================================================================
// Constructor & Session Driver
// ============================================================================

impl<'a> UploadFsm<'a, AwaitReady> {
    pub fn new(
        conn: &'a mut dyn Connection,
        data: &'a [u8],
        digest: String,
        config: UploadConfig,
        reset: bool,
    ) -> Box<dyn UploadState<'a> + 'a> {
        Box::new(UploadFsm {
            state: PhantomData::<AwaitReady>,
            conn,
            data,
            digest,
            config,
            offset: 0,
            seq: 1,
            reset,
            trailing: String::new(),
        })
    }
}

/// Runs one complete upload session: sends the command line, then drives
/// the state machine over `conn` until it finishes or fails. There is no
/// command-level retry; only the packet-level retries inside the machine.
pub fn run_upload<'a>(
    conn: &'a mut dyn Connection,
    destination: &str,
    data: &'a [u8],
    config: &UploadConfig,
    reset: bool,
) -> Result<UploadReport, UploadError> {
    conn.send_line(&format!("upload {}", destination))?;

    let digest = hex::encode(Md5::digest(data));
    info!(bytes = data.len(), %digest, %destination, "starting upload");

    let mut state = UploadFsm::new(conn, data, digest, config.clone(), reset);
    loop {
        match state.step()? {
            Step::Next(next) => state = next,
            Step::Done(report) => return Ok(report),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnection;

    fn test_config() -> UploadConfig {
        UploadConfig {
            response_timeout: Duration::from_millis(10),
            retry_budget: MAXRETRANS,
            retry_backoff: Duration::ZERO,
            drain_window: Duration::from_millis(10),
        }
    }

    fn md5_hex(data: &[u8]) -> String {
        hex::encode(Md5::digest(data))
    }

    fn command_bytes(destination: &str) -> Vec<u8> {
        format!("upload {}\n", destination).into_bytes()
    }

    #[test]
    fn test_full_transfer() {
        // 300 bytes: two full chunks plus a 44-byte remainder
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // chunk 0
            Some(ACK), // chunk 1
            Some(ACK), // chunk 2 (44 bytes, padded)
            Some(ACK), // EOT
        ];

        let mut expected_writes = command_bytes("/data/app.bin");
        let digest = md5_hex(&content);
        expected_writes
            .extend_from_slice(&build_packet(0, digest.as_bytes(), BlockKind::Long).unwrap());
        expected_writes
            .extend_from_slice(&build_packet(1, &content[..128], BlockKind::Short).unwrap());
        expected_writes
            .extend_from_slice(&build_packet(2, &content[128..256], BlockKind::Short).unwrap());
        expected_writes
            .extend_from_slice(&build_packet(3, &content[256..], BlockKind::Short).unwrap());
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        let report =
            run_upload(&mut conn, "/data/app.bin", &content, &test_config(), false).unwrap();
        assert_eq!(report.trailing_output, "");
        assert!(report.reset.is_none());
    }

    #[test]
    fn test_empty_file_sends_no_data_chunks() {
        let responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // EOT
        ];

        let mut expected_writes = command_bytes("/data/empty");
        let digest = md5_hex(b"");
        expected_writes
            .extend_from_slice(&build_packet(0, digest.as_bytes(), BlockKind::Long).unwrap());
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        run_upload(&mut conn, "/data/empty", b"", &test_config(), false).unwrap();
    }

    #[test]
    fn test_handshake_recovers_from_noise() {
        // A timeout, a stray byte, then NAK: NAK counts as ready too
        let content = b"hi".to_vec();
        let responses = vec![
            None,
            Some(0x7F),
            Some(NAK),
            Some(ACK), // digest
            Some(ACK), // chunk 0
            Some(ACK), // EOT
        ];

        let mut expected_writes = command_bytes("/x");
        let digest = md5_hex(&content);
        expected_writes
            .extend_from_slice(&build_packet(0, digest.as_bytes(), BlockKind::Long).unwrap());
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap();
    }

    #[test]
    fn test_handshake_budget_exhaustion() {
        let responses = vec![None; MAXRETRANS as usize];
        let expected_writes = command_bytes("/x");

        let mut conn = MockConnection::new(responses, expected_writes);
        let err = run_upload(&mut conn, "/x", b"data", &test_config(), false).unwrap_err();
        assert!(matches!(
            err,
            UploadError::RetryBudgetExhausted(Stage::Handshake)
        ));
    }

    #[test]
    fn test_digest_nak_exhausts_budget_after_exact_attempts() {
        let content = b"payload".to_vec();
        let mut responses = vec![Some(CRC_CHR)];
        responses.extend(vec![Some(NAK); MAXRETRANS as usize]);

        let mut expected_writes = command_bytes("/x");
        let digest_packet = build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap();
        for _ in 0..MAXRETRANS {
            expected_writes.extend_from_slice(&digest_packet);
        }

        let mut conn = MockConnection::new(responses, expected_writes);
        let err = run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap_err();
        assert!(matches!(
            err,
            UploadError::RetryBudgetExhausted(Stage::Digest)
        ));
    }

    #[test]
    fn test_cancel_aborts_immediately_during_data() {
        let content = b"some data".to_vec();
        let responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(CAN), // first data chunk
        ];

        let mut expected_writes = command_bytes("/x");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        // The cancelled chunk is sent exactly once
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());

        let mut conn = MockConnection::new(responses, expected_writes);
        let err = run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap_err();
        assert!(matches!(err, UploadError::Cancelled(Stage::DataChunk(0))));
    }

    #[test]
    fn test_cancel_aborts_handshake() {
        let responses = vec![Some(CAN)];
        let mut conn = MockConnection::new(responses, command_bytes("/x"));
        let err = run_upload(&mut conn, "/x", b"data", &test_config(), false).unwrap_err();
        assert!(matches!(err, UploadError::Cancelled(Stage::Handshake)));
    }

    #[test]
    fn test_unexpected_byte_retransmits_chunk() {
        let content = b"retry me".to_vec();
        let responses = vec![
            Some(CRC_CHR),
            Some(ACK),  // digest
            Some(0x55), // junk instead of ACK
            Some(ACK),  // retransmission accepted
            Some(ACK),  // EOT
        ];

        let mut expected_writes = command_bytes("/x");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        let chunk_packet = build_packet(1, &content, BlockKind::Short).unwrap();
        expected_writes.extend_from_slice(&chunk_packet);
        expected_writes.extend_from_slice(&chunk_packet);
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap();
    }

    #[test]
    fn test_sequence_numbers_wrap_modulo_256() {
        // 300 full chunks: sequence numbers 1..=255, 0, 1..=44
        let content = vec![0xA5u8; 300 * SHORT_BLOCK_CAPACITY];

        let mut responses = vec![Some(CRC_CHR), Some(ACK)];
        responses.extend(vec![Some(ACK); 300]);
        responses.push(Some(ACK)); // EOT

        let mut expected_writes = command_bytes("/big");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        for i in 0..300usize {
            let seq = ((i + 1) % 256) as u8;
            let chunk = &content[i * SHORT_BLOCK_CAPACITY..(i + 1) * SHORT_BLOCK_CAPACITY];
            expected_writes.extend_from_slice(&build_packet(seq, chunk, BlockKind::Short).unwrap());
        }
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        run_upload(&mut conn, "/big", &content, &test_config(), false).unwrap();
    }

    #[test]
    fn test_eot_rejection_is_fatal() {
        let content = b"z".to_vec();
        let responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // chunk
            Some(NAK), // EOT rejected
        ];

        let mut expected_writes = command_bytes("/x");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        let err = run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap_err();
        assert!(matches!(err, UploadError::RetryBudgetExhausted(Stage::Eot)));
    }

    #[test]
    fn test_trailing_output_is_reported() {
        let content = b"q".to_vec();
        let mut responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // chunk
            Some(ACK), // EOT
        ];
        responses.extend(b"file saved\n".iter().map(|&b| Some(b)));
        responses.push(None); // quiet, drain ends

        let mut expected_writes = command_bytes("/x");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        let report = run_upload(&mut conn, "/x", &content, &test_config(), false).unwrap();
        assert_eq!(report.trailing_output, "file saved");
    }

    #[test]
    fn test_reset_success() {
        let content = b"fw".to_vec();
        let mut responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // chunk
            Some(ACK), // EOT
            None,      // nothing trailing
            None,      // nothing to drain before reset
        ];
        responses.extend(b"OK Rebooting\n".iter().map(|&b| Some(b)));

        let mut expected_writes = command_bytes("/fw.bin");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());
        expected_writes.push(EOT);
        expected_writes.extend_from_slice(b"reset\n");

        let mut conn = MockConnection::new(responses, expected_writes);
        let report = run_upload(&mut conn, "/fw.bin", &content, &test_config(), true).unwrap();
        let reset = report.reset.expect("reset status missing");
        assert!(reset.success);
        assert_eq!(reset.response, "OK Rebooting");
    }

    #[test]
    fn test_reset_failure_is_reported_not_raised() {
        let content = b"fw".to_vec();
        let mut responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(ACK), // chunk
            Some(ACK), // EOT
            None,      // nothing trailing
            None,      // nothing to drain before reset
        ];
        responses.extend(b"OK\n".iter().map(|&b| Some(b)));

        let mut expected_writes = command_bytes("/fw.bin");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        expected_writes.extend_from_slice(&build_packet(1, &content, BlockKind::Short).unwrap());
        expected_writes.push(EOT);
        expected_writes.extend_from_slice(b"reset\n");

        let mut conn = MockConnection::new(responses, expected_writes);
        let report = run_upload(&mut conn, "/fw.bin", &content, &test_config(), true).unwrap();
        let reset = report.reset.expect("reset status missing");
        assert!(!reset.success);
        assert_eq!(reset.response, "OK");
    }

    #[test]
    fn test_retry_budget_resets_per_chunk() {
        // Each chunk fails once before being accepted; neither hits the budget
        let content = vec![0x11u8; 2 * SHORT_BLOCK_CAPACITY];
        let config = UploadConfig {
            retry_budget: 2,
            ..test_config()
        };

        let responses = vec![
            Some(CRC_CHR),
            Some(ACK), // digest
            Some(NAK),
            Some(ACK), // chunk 0, second attempt
            Some(NAK),
            Some(ACK), // chunk 1, second attempt
            Some(ACK), // EOT
        ];

        let mut expected_writes = command_bytes("/x");
        expected_writes.extend_from_slice(
            &build_packet(0, md5_hex(&content).as_bytes(), BlockKind::Long).unwrap(),
        );
        let chunk0 = build_packet(1, &content[..128], BlockKind::Short).unwrap();
        let chunk1 = build_packet(2, &content[128..], BlockKind::Short).unwrap();
        expected_writes.extend_from_slice(&chunk0);
        expected_writes.extend_from_slice(&chunk0);
        expected_writes.extend_from_slice(&chunk1);
        expected_writes.extend_from_slice(&chunk1);
        expected_writes.push(EOT);

        let mut conn = MockConnection::new(responses, expected_writes);
        run_upload(&mut conn, "/x", &content, &config, false).unwrap();
    }
}
