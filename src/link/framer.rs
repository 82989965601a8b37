//! Incremental framer for the radio's stream framing envelope.
//!
//! The radio emits binary frames on its stream API as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <payload bytes>`
//!
//! This framer can be fed arbitrary chunks and yields whole payloads when
//! available. It applies a conservative size cap and resynchronizes on
//! malformed input by scanning forward to the next possible header byte.
use bytes::{Buf, BytesMut};

pub const FRAME_MAGIC_0: u8 = 0x94;
pub const FRAME_MAGIC_1: u8 = 0xC3;

/// Maximum allowed frame size (sane upper bound to avoid runaway allocation)
const MAX_FRAME_SIZE: usize = 8192;

pub struct StreamFramer {
    buf: BytesMut,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempt to extract the next complete frame payload. Returns None until a
    /// full frame is buffered. On malformed data (bad header, zero or oversize
    /// length) it advances past the garbage and keeps scanning.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.buf.len() < 4 {
                return None;
            }
            // Realign to header if needed
            if !(self.buf[0] == FRAME_MAGIC_0 && self.buf[1] == FRAME_MAGIC_1) {
                match self.buf.iter().position(|&b| b == FRAME_MAGIC_0) {
                    Some(0) => {
                        // First byte matches but second doesn't; skip it
                        self.buf.advance(1);
                    }
                    Some(pos) => {
                        self.buf.advance(pos);
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
                continue;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_SIZE {
                // unreasonable length, shift one byte and resync
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < 4 + declared {
                return None;
            }
            let _ = self.buf.split_to(4); // discard header
            let frame = self.buf.split_to(declared).to_vec();
            return Some(frame);
        }
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepend the framing header to a payload for writing.
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FRAME_MAGIC_0);
    out.push(FRAME_MAGIC_1);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    out
}
