//! Bit-level writer and reader used by the Huffman codec.
//!
//! Both sides work MSB-first: the first bit written lands in the most
//! significant bit of the first byte. The writer pads the final byte with
//! zero bits and reports how many padding bits it added; the reader is told
//! the exact number of meaningful bits so padding is never mistaken for data.

/// Accumulates bits MSB-first into a byte buffer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    /// Partial byte, filled from the top bit down
    current: u8,
    /// Bits already placed in `current` (0-7)
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            current: 0,
            filled: 0,
        }
    }

    /// Append the lowest `count` bits of `value`, most significant first.
    ///
    /// `count` must be at most 64.
    pub fn write_bits(&mut self, value: u64, count: u8) {
        debug_assert!(count <= 64, "cannot write {count} bits at once");

        for shift in (0..count).rev() {
            let bit = ((value >> shift) & 1) as u8;
            self.current |= bit << (7 - self.filled);
            self.filled += 1;

            if self.filled == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    /// Total number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.filled as usize
    }

    /// Flush the partial byte and return `(bytes, padding_bits)`.
    pub fn finish(mut self) -> (Vec<u8>, u8) {
        if self.filled == 0 {
            return (self.bytes, 0);
        }

        let padding = 8 - self.filled;
        self.bytes.push(self.current);
        (self.bytes, padding)
    }
}

/// Reads a bounded number of bits MSB-first from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    limit: usize,
}

impl<'a> BitReader<'a> {
    /// Reader over every bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_bit_len(data, data.len() * 8)
    }

    /// Reader that stops after `bit_len` bits. `bit_len` is clamped to the
    /// size of `data`.
    pub fn with_bit_len(data: &'a [u8], bit_len: usize) -> Self {
        Self {
            data,
            position: 0,
            limit: bit_len.min(data.len() * 8),
        }
    }

    /// Next bit, or `None` once the declared length is consumed.
    pub fn read_bit(&mut self) -> Option<bool> {
        if self.position >= self.limit {
            return None;
        }

        let byte = self.data[self.position / 8];
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Some(bit == 1)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.limit
    }
}
