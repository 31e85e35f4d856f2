//! The file link address table: `(timecode, size)` pairs the main executable
//! uses to seek to files on the disc.
//!
//! When a file on the disc grows or shrinks, everything after it moves and
//! the table has to follow. This module finds the table, works out what
//! changed between an original and a modified disc, and writes the corrected
//! table back into the modified image.

mod compare;
mod table;
mod timecode;
mod write;

pub use compare::{compare, recalculate, sector_delta, FlaDifference};
pub use table::{FlaEntry, FlaTable, ENTRY_SIZE, MAX_FILE_SIZE, MIN_SCAN_RUN};
pub use timecode::Timecode;
pub use write::{patch_image, read_table_from_image, write_table, DiscTable, PatchReport};

use crate::cd::CdError;
use std::io;
use thiserror::Error;

pub const DEFAULT_TABLE_OFFSET: u32 = 0x6E6F0;
pub const DEFAULT_SCAN_START: u32 = 0x10000;
pub const DEFAULT_EXECUTABLE: &str = "EXE/MAIN0.EXE";

#[derive(Debug, Error)]
pub enum FlaError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cd(#[from] CdError),

    #[error("no FLA table at {offset:#X} and none found scanning from {scan_start:#X}")]
    TableNotFound { offset: u32, scan_start: u32 },

    #[error("FLA table at {offset:#X} runs past the end of the executable")]
    TableTruncated { offset: u32 },

    #[error("FLA tables differ in size ({original} vs {modified} entries); the images are not compatible")]
    EntryCountMismatch { original: usize, modified: usize },

    #[error("entry {index}: shifting by {delta} sectors leaves the timecode range")]
    TimecodeOutOfRange { index: usize, delta: i64 },

    #[error("write offset {offset:#X} is beyond the end of the image ({image_len} bytes)")]
    OffsetBeyondImage { offset: u64, image_len: u64 },

    #[error("partial write at {offset:#X}: {written} of {expected} bytes")]
    PartialWrite {
        offset: u64,
        written: usize,
        expected: usize,
    },

    #[error("read-back verification failed at {offset:#X}; original bytes restored")]
    VerificationFailed { offset: u64 },
}

/// Everything the FLA pipeline needs to know about the target game build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaOptions {
    pub executable_path: String,
    pub table_offset: u32,
    pub scan_start: u32,
    pub shift_unlinked: bool,
    pub verify: bool,
    pub dry_run: bool,
}

impl Default for FlaOptions {
    fn default() -> Self {
        Self {
            executable_path: DEFAULT_EXECUTABLE.to_string(),
            table_offset: DEFAULT_TABLE_OFFSET,
            scan_start: DEFAULT_SCAN_START,
            shift_unlinked: false,
            verify: true,
            dry_run: false,
        }
    }
}
