//! BLE multipart framing
//!
//! A BLE characteristic write carries at most a few dozen bytes, so every
//! application message is cut into packets. Each packet starts with one
//! header byte: the top two bits carry the multipart state and the low six
//! bits carry the payload length of that packet.

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Largest packet the 6-bit size field can describe, header included
pub const MAX_PACKET_SIZE_LIMIT: usize = 64;

/// Smallest usable packet: a header and one payload byte
pub const MIN_PACKET_SIZE: usize = 2;

/// Default BLE packet size (classic 23-byte ATT MTU minus headers)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 20;

const SIZE_MASK: u8 = 0b0011_1111;

/// Position of a packet within a multipart message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartState {
    /// More packets follow this one
    Continue = 0b00,
    /// Last packet of a multipart message
    End = 0b01,
    /// First packet of a multipart message
    Start = 0b10,
    /// Whole message in one packet
    Solo = 0b11,
}

impl MultipartState {
    fn from_header(header: u8) -> Self {
        match header >> 6 {
            0b00 => Self::Continue,
            0b01 => Self::End,
            0b10 => Self::Start,
            _ => Self::Solo,
        }
    }

    fn header(self, size: usize) -> u8 {
        // size is bounded by the packet size, which never exceeds 63 payload bytes
        #[allow(clippy::cast_possible_truncation)]
        let size = (size as u8) & SIZE_MASK;
        ((self as u8) << 6) | size
    }
}

/// Framing configuration errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Packet size out of the representable range
    #[error("invalid packet size {size}: must be in {min}..={max}")]
    InvalidPacketSize {
        /// Requested size
        size: usize,
        /// Smallest accepted size
        min: usize,
        /// Largest accepted size
        max: usize,
    },
}

/// Splits messages into BLE packets
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    max_packet_size: usize,
}

impl FrameEncoder {
    /// Create an encoder for the negotiated packet size
    ///
    /// # Errors
    ///
    /// Returns `FrameError::InvalidPacketSize` unless the size is in `2..=64`.
    pub fn new(max_packet_size: usize) -> Result<Self, FrameError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE_LIMIT).contains(&max_packet_size) {
            return Err(FrameError::InvalidPacketSize {
                size: max_packet_size,
                min: MIN_PACKET_SIZE,
                max: MAX_PACKET_SIZE_LIMIT,
            });
        }
        Ok(Self { max_packet_size })
    }

    /// Maximum packet size, header included
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Encode a message into packets
    #[must_use]
    pub fn encode(&self, message: &[u8]) -> Vec<Vec<u8>> {
        let payload_size = self.max_packet_size - 1;

        if message.len() <= payload_size {
            let mut packet = Vec::with_capacity(message.len() + 1);
            packet.push(MultipartState::Solo.header(message.len()));
            packet.extend_from_slice(message);
            return vec![packet];
        }

        let chunk_count = message.len().div_ceil(payload_size);
        message
            .chunks(payload_size)
            .enumerate()
            .map(|(index, chunk)| {
                let state = if index == 0 {
                    MultipartState::Start
                } else if index + 1 == chunk_count {
                    MultipartState::End
                } else {
                    MultipartState::Continue
                };
                let mut packet = Vec::with_capacity(chunk.len() + 1);
                packet.push(state.header(chunk.len()));
                packet.extend_from_slice(chunk);
                packet
            })
            .collect()
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Reassembles packets into messages
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    in_message: bool,
    dropped: u64,
}

impl FrameDecoder {
    /// Create an idle decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; returns a complete message when one is finished
    ///
    /// Malformed and out-of-order packets are dropped, never returned as
    /// errors: BLE links lose and reorder packets.
    pub fn push(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        let Some((&header, payload)) = packet.split_first() else {
            self.dropped += 1;
            return None;
        };

        if usize::from(header & SIZE_MASK) != payload.len() {
            tracing::trace!(
                declared = header & SIZE_MASK,
                actual = payload.len(),
                "Dropping packet with size mismatch"
            );
            self.dropped += 1;
            return None;
        }

        match MultipartState::from_header(header) {
            MultipartState::Solo => {
                if self.in_message {
                    tracing::warn!("Solo packet received mid-message, dropping it");
                    self.dropped += 1;
                    return None;
                }
                Some(payload.to_vec())
            }
            MultipartState::Start => {
                if self.in_message {
                    tracing::warn!(
                        partial = self.buffer.len(),
                        "Start packet received mid-message, discarding partial message"
                    );
                    self.dropped += 1;
                }
                self.buffer.clear();
                self.buffer.extend_from_slice(payload);
                self.in_message = true;
                None
            }
            MultipartState::Continue => {
                if !self.in_message {
                    tracing::warn!("Continue packet received while idle, dropping it");
                    self.dropped += 1;
                    return None;
                }
                self.buffer.extend_from_slice(payload);
                None
            }
            MultipartState::End => {
                if !self.in_message {
                    tracing::warn!("End packet received while idle, dropping it");
                    self.dropped += 1;
                    return None;
                }
                self.buffer.extend_from_slice(payload);
                self.in_message = false;
                Some(std::mem::take(&mut self.buffer))
            }
        }
    }

    /// Whether a multipart message is partially received
    #[must_use]
    pub fn is_mid_message(&self) -> bool {
        self.in_message
    }

    /// Number of packets dropped so far
    #[must_use]
    pub fn dropped_packets(&self) -> u64 {
        self.dropped
    }

    /// Discard any partial message
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_message = false;
    }
}
