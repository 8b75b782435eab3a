//! Datagram fragmentation and reassembly.
//!
//! A payload that fits in one datagram is sent untouched. A larger payload is
//! split into chunks, each carrying a 14-byte header:
//!
//! ```text
//! marker:u32 = 0xCAFEBABE | packetId:u32 | chunkIndex:u16 | totalChunks:u16 | payloadLength:u16
//! ```
//!
//! Chunks may arrive in any order and more than once. A packet is released
//! exactly once, when every index has been seen, and its buffer is dropped at
//! that moment. Buffers that never complete are evicted by age.

use crate::config::TetherConfig;
use crate::frame::{read_u16_le, read_u32_le};
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Marker opening every chunk header.
pub const CHUNK_MARKER: u32 = 0xCAFE_BABE;
/// Size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 14;

/// Partially received packet.
#[derive(Debug)]
struct ChunkBuffer {
    total_chunks: u16,
    slots: Vec<Option<Vec<u8>>>,
    received: usize,
    age: Duration,
    sequence: u64,
}

impl ChunkBuffer {
    fn new(total_chunks: u16, sequence: u64) -> Self {
        Self {
            total_chunks,
            slots: vec![None; total_chunks as usize],
            received: 0,
            age: Duration::ZERO,
            sequence,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.total_chunks as usize
    }

    fn concat(self) -> Vec<u8> {
        let len = self.slots.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for slot in self.slots.into_iter().flatten() {
            out.extend_from_slice(&slot);
        }
        out
    }
}

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Packet this chunk belongs to.
    pub packet_id: u32,
    /// Zero-based position within the packet.
    pub chunk_index: u16,
    /// Number of chunks in the packet.
    pub total_chunks: u16,
    /// Bytes of payload following the header.
    pub payload_length: u16,
}

impl ChunkHeader {
    /// Read a header if `data` starts with the chunk marker.
    ///
    /// Returns `None` for datagrams that are not chunks at all.
    pub fn peek(data: &[u8]) -> Option<Self> {
        if data.len() < CHUNK_HEADER_SIZE || read_u32_le(&data[0..4]) != CHUNK_MARKER {
            return None;
        }
        Some(Self {
            packet_id: read_u32_le(&data[4..8]),
            chunk_index: read_u16_le(&data[8..10]),
            total_chunks: read_u16_le(&data[10..12]),
            payload_length: read_u16_le(&data[12..14]),
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&CHUNK_MARKER.to_le_bytes());
        buf.extend_from_slice(&self.packet_id.to_le_bytes());
        buf.extend_from_slice(&self.chunk_index.to_le_bytes());
        buf.extend_from_slice(&self.total_chunks.to_le_bytes());
        buf.extend_from_slice(&self.payload_length.to_le_bytes());
    }
}

/// Splits outgoing payloads and reassembles incoming chunks for one peer.
#[derive(Debug)]
pub struct ChunkReassembler {
    max_chunk_size: usize,
    chunk_timeout: Duration,
    max_pending: usize,
    next_packet_id: u32,
    next_sequence: u64,
    buffers: HashMap<u32, ChunkBuffer>,
}

impl ChunkReassembler {
    /// Create a reassembler with the limits from `config`.
    pub fn new(config: &TetherConfig) -> Self {
        Self::with_limits(
            config.max_chunk_size,
            config.chunk_timeout(),
            config.max_pending_packets,
        )
    }

    /// Create a reassembler with explicit limits.
    pub fn with_limits(max_chunk_size: usize, chunk_timeout: Duration, max_pending: usize) -> Self {
        Self {
            max_chunk_size,
            chunk_timeout,
            max_pending: max_pending.max(1),
            next_packet_id: 1,
            next_sequence: 0,
            buffers: HashMap::new(),
        }
    }

    /// Split `payload` into datagrams no larger than the configured chunk size.
    ///
    /// A payload that fits together with a header is returned as a single,
    /// unmodified datagram.
    pub fn fragment(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        if payload.len() + CHUNK_HEADER_SIZE <= self.max_chunk_size {
            return Ok(vec![payload.to_vec()]);
        }

        if self.max_chunk_size <= CHUNK_HEADER_SIZE {
            return Err(Error::Config(format!(
                "max chunk size {} leaves no room for payload",
                self.max_chunk_size
            )));
        }

        let room = (self.max_chunk_size - CHUNK_HEADER_SIZE).min(u16::MAX as usize);
        let total = payload.len().div_ceil(room);
        let total_chunks = u16::try_from(total).map_err(|_| Error::OutOfBounds {
            field: "chunk count",
            value: total,
            min: 1,
            max: u16::MAX as usize,
        })?;

        let packet_id = self.allocate_packet_id();
        let chunks = payload
            .chunks(room)
            .enumerate()
            .map(|(index, piece)| {
                let header = ChunkHeader {
                    packet_id,
                    chunk_index: index as u16,
                    total_chunks,
                    payload_length: piece.len() as u16,
                };
                let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + piece.len());
                header.write(&mut buf);
                buf.extend_from_slice(piece);
                buf
            })
            .collect::<Vec<_>>();

        debug!(packet_id, total_chunks, len = payload.len(), "fragmented payload");
        Ok(chunks)
    }

    /// Feed one received datagram.
    ///
    /// Returns `Some(payload)` when a datagram is complete: immediately for a
    /// datagram that is not a chunk, or when the last missing chunk of a packet
    /// arrives. Returns `None` while a packet is still incomplete.
    pub fn reassemble(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>> {
        let header = match ChunkHeader::peek(datagram) {
            Some(header) => header,
            None => return Ok(Some(datagram.to_vec())),
        };

        if header.total_chunks == 0 || header.chunk_index >= header.total_chunks {
            return Err(Error::InvalidFrame(format!(
                "chunk {} of {} in packet {}",
                header.chunk_index, header.total_chunks, header.packet_id
            )));
        }
        let body = &datagram[CHUNK_HEADER_SIZE..];
        if body.len() != header.payload_length as usize {
            return Err(Error::InvalidFrame(format!(
                "chunk declares {} payload bytes, carries {}",
                header.payload_length,
                body.len()
            )));
        }

        if !self.buffers.contains_key(&header.packet_id) {
            if self.buffers.len() >= self.max_pending {
                self.evict_oldest();
            }
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.buffers.insert(
                header.packet_id,
                ChunkBuffer::new(header.total_chunks, sequence),
            );
        }

        let buffer = match self.buffers.get_mut(&header.packet_id) {
            Some(buffer) => buffer,
            None => return Ok(None),
        };
        if buffer.total_chunks != header.total_chunks {
            return Err(Error::InvalidFrame(format!(
                "packet {} total changed from {} to {}",
                header.packet_id, buffer.total_chunks, header.total_chunks
            )));
        }

        let slot = &mut buffer.slots[header.chunk_index as usize];
        if slot.is_none() {
            buffer.received += 1;
        }
        *slot = Some(body.to_vec());

        if !buffer.is_complete() {
            return Ok(None);
        }

        match self.buffers.remove(&header.packet_id) {
            Some(buffer) => Ok(Some(buffer.concat())),
            None => Ok(None),
        }
    }

    /// Age every pending buffer by `elapsed` and drop those past the timeout.
    ///
    /// Returns the number of buffers evicted.
    pub fn evict_expired(&mut self, elapsed: Duration) -> usize {
        let timeout = self.chunk_timeout;
        let before = self.buffers.len();
        self.buffers.retain(|packet_id, buffer| {
            buffer.age += elapsed;
            let keep = buffer.age < timeout;
            if !keep {
                warn!(
                    packet_id,
                    received = buffer.received,
                    total = buffer.total_chunks,
                    "evicting stale chunk buffer"
                );
            }
            keep
        });
        before - self.buffers.len()
    }

    /// Number of packets with at least one chunk received and not yet complete.
    pub fn pending_packets(&self) -> usize {
        self.buffers.len()
    }

    /// Drop every pending buffer.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    fn allocate_packet_id(&mut self) -> u32 {
        let id = self.next_packet_id;
        self.next_packet_id = match id {
            u32::MAX => 1,
            n => n + 1,
        };
        id
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, buffer)| buffer.sequence)
            .map(|(packet_id, _)| *packet_id);
        if let Some(packet_id) = oldest {
            warn!(packet_id, "pending packet limit reached, evicting oldest");
            self.buffers.remove(&packet_id);
        }
    }
}
