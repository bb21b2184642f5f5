// src/tsm/mod.rs

//! TSM output files
//!
//! A TSM file is composed of four sections: header, blocks, index and footer.
//!
//! ```text
//! ┌────────┬──────────────────────┬─────────────┬──────────────┐
//! │ Header │        Blocks        │    Index    │    Footer    │
//! │5 bytes │       N bytes        │   N bytes   │   8 bytes    │
//! └────────┴──────────────────────┴─────────────┴──────────────┘
//! ```
//!
//! The header is a 4-byte magic number and a 1-byte version. Blocks are
//! `[crc32 u32][data]` pairs; data is opaque to the file layout (see
//! [`encoding`]). The index is ordered by key; every entry is
//!
//! ```text
//! [key len u16][key][type u8][block count u16]
//!   ([min time i64][max time i64][offset u64][size u32])*
//! ```
//!
//! where `size` covers the CRC and the data. The footer holds the offset of
//! the index. All integers are big-endian.
//!
//! The encoded size of a series is exact before anything is written, so a
//! writer can decide on rollover without touching the file.

pub mod encoding;
mod reader;
mod writer;

pub use encoding::{EncodedBlock, EncodedSeries, encode_series};
pub use reader::TsmReader;
pub use writer::TsmWriter;

use crate::model::{SeriesKey, ValueKind};

/// Magic number at the start of every TSM file
pub const MAGIC: u32 = 0x16D1_16D1;

/// Format version written by this crate
pub const VERSION: u8 = 1;

pub const HEADER_SIZE: u64 = 5;
pub const FOOTER_SIZE: u64 = 8;

/// Hard ceiling on the size of a TSM file (2 GiB)
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Maximum number of points in one block
pub const MAX_POINTS_PER_BLOCK: usize = 1000;

/// Size of one block entry in the index
pub const INDEX_BLOCK_ENTRY_SIZE: u64 = 8 + 8 + 8 + 4;

/// Location of one block in a TSM file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub min_time: i64,
    pub max_time: i64,
    pub offset: u64,
    pub size: u32,
}

/// Index entry of one series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: SeriesKey,
    pub kind: ValueKind,
    pub blocks: Vec<BlockMeta>,
}

impl IndexEntry {
    /// Bytes this entry occupies in the index
    pub fn encoded_len(&self) -> u64 {
        index_entry_len(self.key.as_str().len(), self.blocks.len())
    }
}

pub(crate) fn index_entry_len(key_len: usize, block_count: usize) -> u64 {
    2 + key_len as u64 + 1 + 2 + block_count as u64 * INDEX_BLOCK_ENTRY_SIZE
}

/// Size of a TSM file holding nothing
pub fn empty_file_size() -> u64 {
    HEADER_SIZE + FOOTER_SIZE
}
