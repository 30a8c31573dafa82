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

//! Packet codec for the framed block protocol.
//!
//! Wire layout of a block, all integers big-endian:
//! `[marker:1][seq:1][255-seq:1][len:1 or 2][payload padded to capacity][crc:2]`
//! The CRC covers the length field and the padded payload, not the header.

use thiserror::Error;

use crate::crc::crc16;
use crate::protocol::{LONG_BLOCK_CAPACITY, PAD, SHORT_BLOCK_CAPACITY, SOH, STX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 128-byte SOH block, 1-byte length field
    Short,
    /// 8192-byte STX block, 2-byte length field
    Long,
}

impl BlockKind {
    pub fn marker(self) -> u8 {
        match self {
            BlockKind::Short => SOH,
            BlockKind::Long => STX,
        }
    }

    pub fn capacity(self) -> usize {
        match self {
            BlockKind::Short => SHORT_BLOCK_CAPACITY,
            BlockKind::Long => LONG_BLOCK_CAPACITY,
        }
    }

    pub fn length_field_size(self) -> usize {
        match self {
            BlockKind::Short => 1,
            BlockKind::Long => 2,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("payload of {len} bytes exceeds {kind:?} block capacity of {capacity}")]
    Oversize {
        len: usize,
        capacity: usize,
        kind: BlockKind,
    },
}

/// Builds one framed block. Payloads shorter than the block capacity are
/// right-padded with 0x1A; the length field holds the unpadded length.
pub fn build_packet(seq: u8, payload: &[u8], kind: BlockKind) -> Result<Vec<u8>, PacketError> {
    let capacity = kind.capacity();
    if payload.len() > capacity {
        return Err(PacketError::Oversize {
            len: payload.len(),
            capacity,
            kind,
        });
    }

    let mut packet = Vec::with_capacity(3 + kind.length_field_size() + capacity + 2);
    packet.push(kind.marker());
    packet.push(seq);
    packet.push(0xFF - seq);

    let len_start = packet.len();
    match kind {
        BlockKind::Short => packet.push(payload.len() as u8),
        BlockKind::Long => packet.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
    }
    packet.extend_from_slice(payload);
    packet.resize(len_start + kind.length_field_size() + capacity, PAD);

    let crc = crc16(&packet[len_start..]);
    packet.extend_from_slice(&crc.to_be_bytes());
    Ok(packet)
}
