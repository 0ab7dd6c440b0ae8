//! Fixed-table Huffman codec applied to every RCON datagram.
//!
//! The frequency table is a protocol constant: both peers must build the
//! same tree or payloads decode to garbage without any error. Bytes missing
//! from the table get [`ESCAPE_WEIGHT`], so arbitrary binary data still has
//! a code.
//!
//! # Frame layout
//!
//! ```text
//! compressed: [padding (0..=7)] [bitstream, MSB-first, zero padded]
//! raw:        [0xFF]            [payload bytes]
//! ```
//!
//! The padding byte tells the decoder how many trailing bits of the last
//! byte are filler, which bounds the bitstream exactly. Since it never
//! exceeds 7, a compressed frame cannot start with [`RAW_MARKER`].

use crate::bitio::{BitReader, BitWriter};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::LazyLock;
use thiserror::Error;

/// First byte of a frame carrying an uncompressed payload.
pub const RAW_MARKER: u8 = 0xFF;

/// Largest legal padding header of a compressed frame.
pub const MAX_PADDING: u8 = 7;

/// Weight given to byte values that do not appear in [`FREQUENCY_TABLE`].
pub const ESCAPE_WEIGHT: u32 = 1;

/// Protocol table, revision 1: byte value and relative weight.
#[rustfmt::skip]
pub const FREQUENCY_TABLE: [(u8, u32); 91] = [
    (0x00, 600), (0x0A, 300), (0x1C, 150),
    (b' ', 1800), (b'!', 30), (b'"', 40), (b'#', 15), (b'$', 10), (b'%', 15),
    (b'&', 10), (b'\'', 60), (b'(', 30), (b')', 30), (b'*', 15), (b'+', 15),
    (b',', 120), (b'-', 80), (b'.', 160), (b'/', 40),
    (b'0', 200), (b'1', 180), (b'2', 140), (b'3', 110), (b'4', 110),
    (b'5', 110), (b'6', 100), (b'7', 100), (b'8', 100), (b'9', 100),
    (b':', 90), (b';', 10), (b'<', 10), (b'=', 30), (b'>', 20), (b'?', 20),
    (b'A', 100), (b'B', 20), (b'C', 45), (b'D', 40), (b'E', 110), (b'F', 25),
    (b'G', 25), (b'H', 35), (b'I', 70), (b'J', 4), (b'K', 10), (b'L', 50),
    (b'M', 40), (b'N', 70), (b'O', 75), (b'P', 35), (b'Q', 2), (b'R', 70),
    (b'S', 80), (b'T', 90), (b'U', 35), (b'V', 12), (b'W', 20), (b'X', 4),
    (b'Y', 20), (b'Z', 3),
    (b'[', 30), (b'\\', 20), (b']', 30), (b'_', 40),
    (b'a', 800), (b'b', 150), (b'c', 280), (b'd', 430), (b'e', 1200),
    (b'f', 220), (b'g', 200), (b'h', 600), (b'i', 700), (b'j', 15),
    (b'k', 80), (b'l', 400), (b'm', 240), (b'n', 700), (b'o', 750),
    (b'p', 190), (b'q', 10), (b'r', 600), (b's', 630), (b't', 900),
    (b'u', 280), (b'v', 100), (b'w', 240), (b'x', 15), (b'y', 200),
    (b'z', 8),
];

static CODEC: LazyLock<Codec> = LazyLock::new(|| Codec::new(&FREQUENCY_TABLE));

/// Compress `raw` with the protocol table.
pub fn encode(raw: &[u8]) -> Vec<u8> {
    CODEC.encode(raw)
}

/// Decompress a frame produced by [`encode`].
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, CodecError> {
    CODEC.decode(frame)
}

/// The process-wide codec built from [`FREQUENCY_TABLE`].
pub fn codec() -> &'static Codec {
    &CODEC
}

/// Codec errors. Each one aborts a single datagram only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("invalid frame header {0:#04x}")]
    InvalidHeader(u8),

    #[error("padding of {padding} bits exceeds the {available} bits in the frame")]
    PaddingOverflow { padding: u8, available: usize },

    #[error("bitstream ended inside a code at bit {position}")]
    TruncatedCode { position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Leaf(u8),
    Branch { zero: usize, one: usize },
}

/// Huffman tree stored as an arena; `root` indexes into `nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTree {
    nodes: Vec<Node>,
    root: usize,
}

impl HuffmanTree {
    /// Build the tree by repeatedly merging the two lightest nodes.
    ///
    /// Ties are broken by creation order: leaves are numbered by byte value,
    /// merged nodes continue from 256. The lighter (or older) node becomes
    /// the `0` branch.
    pub fn build(table: &[(u8, u32)]) -> Self {
        let mut weights = [ESCAPE_WEIGHT; 256];
        for &(byte, weight) in table {
            weights[byte as usize] = weight;
        }

        let mut nodes: Vec<Node> = (0..=255u8).map(Node::Leaf).collect();
        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = weights
            .iter()
            .enumerate()
            .map(|(index, &weight)| Reverse((weight as u64, index)))
            .collect();

        while heap.len() > 1 {
            let Some(Reverse((zero_weight, zero))) = heap.pop() else {
                break;
            };
            let Some(Reverse((one_weight, one))) = heap.pop() else {
                break;
            };

            nodes.push(Node::Branch { zero, one });
            heap.push(Reverse((zero_weight + one_weight, nodes.len() - 1)));
        }

        let root = nodes.len() - 1;
        Self { nodes, root }
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> Node {
        self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A single code: the low `len` bits of `bits`, emitted MSB-first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Code {
    pub bits: u64,
    pub len: u8,
}

/// Byte value to code lookup derived from a [`HuffmanTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    codes: [Code; 256],
}

impl CodeTable {
    pub fn from_tree(tree: &HuffmanTree) -> Self {
        let mut codes = [Code::default(); 256];
        let mut stack = vec![(tree.root(), Code::default())];

        while let Some((index, code)) = stack.pop() {
            match tree.node(index) {
                Node::Leaf(byte) => codes[byte as usize] = code,
                Node::Branch { zero, one } => {
                    debug_assert!(code.len < 64, "code longer than 64 bits");
                    let next = |bit: u64| Code {
                        bits: (code.bits << 1) | bit,
                        len: code.len + 1,
                    };
                    stack.push((one, next(1)));
                    stack.push((zero, next(0)));
                }
            }
        }

        Self { codes }
    }

    pub fn get(&self, byte: u8) -> Code {
        self.codes[byte as usize]
    }

    /// Length in bits of the longest code.
    pub fn max_len(&self) -> u8 {
        self.codes.iter().map(|code| code.len).max().unwrap_or(0)
    }
}

/// Tree plus code table for one frequency table.
#[derive(Debug, Clone)]
pub struct Codec {
    tree: HuffmanTree,
    codes: CodeTable,
}

impl Codec {
    pub fn new(table: &[(u8, u32)]) -> Self {
        let tree = HuffmanTree::build(table);
        let codes = CodeTable::from_tree(&tree);
        Self { tree, codes }
    }

    pub fn tree(&self) -> &HuffmanTree {
        &self.tree
    }

    pub fn code_table(&self) -> &CodeTable {
        &self.codes
    }

    /// Compress, then fall back to a raw frame unless that made it smaller.
    pub fn encode(&self, raw: &[u8]) -> Vec<u8> {
        let mut writer = BitWriter::with_capacity(raw.len());
        for &byte in raw {
            let code = self.codes.get(byte);
            writer.write_bits(code.bits, code.len);
        }
        let (bitstream, padding) = writer.finish();

        if bitstream.len() + 1 >= raw.len() {
            let mut frame = Vec::with_capacity(raw.len() + 1);
            frame.push(RAW_MARKER);
            frame.extend_from_slice(raw);
            return frame;
        }

        let mut frame = Vec::with_capacity(bitstream.len() + 1);
        frame.push(padding);
        frame.extend_from_slice(&bitstream);
        frame
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (&header, body) = frame.split_first().ok_or(CodecError::EmptyFrame)?;

        if header == RAW_MARKER {
            return Ok(body.to_vec());
        }
        if header > MAX_PADDING {
            return Err(CodecError::InvalidHeader(header));
        }

        let available = body.len() * 8;
        let bit_len = available
            .checked_sub(header as usize)
            .ok_or(CodecError::PaddingOverflow { padding: header, available })?;

        let mut output = Vec::with_capacity(body.len() * 2);
        if bit_len == 0 {
            return Ok(output);
        }

        let mut reader = BitReader::with_bit_len(body, bit_len);
        let root = self.tree.root();
        let mut cursor = root;

        while let Some(bit) = reader.read_bit() {
            cursor = match self.tree.node(cursor) {
                Node::Branch { zero, one } => {
                    if bit {
                        one
                    } else {
                        zero
                    }
                }
                Node::Leaf(_) => unreachable!("cursor resets to the root after each leaf"),
            };

            if let Node::Leaf(byte) = self.tree.node(cursor) {
                output.push(byte);
                cursor = root;
            }
        }

        if cursor != root {
            return Err(CodecError::TruncatedCode { position: reader.position() });
        }

        Ok(output)
    }
}
