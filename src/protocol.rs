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

//! Upload protocol constants

/// Start of header - begins a 128-byte data block
pub const SOH: u8 = 0x01;

/// Start of text - begins an 8192-byte data block
pub const STX: u8 = 0x02;

/// End of transmission - sender signals no more data blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the last block
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver rejected the last block, retransmit
pub const NAK: u8 = 0x15;

/// Cancel - receiver aborts the whole transfer
pub const CAN: u8 = 0x18;

/// Receiver requests CRC mode and is ready for data
pub const CRC_CHR: u8 = b'C';

/// Padding byte used to fill a block out to its full capacity
pub const PAD: u8 = 0x1A;

/// Payload capacity of a SOH (short) block
pub const SHORT_BLOCK_CAPACITY: usize = 128;

/// Payload capacity of a STX (long) block
pub const LONG_BLOCK_CAPACITY: usize = 8192;

/// Maximum attempts for any retryable protocol step
pub const MAXRETRANS: u32 = 20;
