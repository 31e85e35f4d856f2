use log::{debug, info, warn};
use std::collections::HashMap;

use super::{FlaError, FlaOptions, Timecode};
use crate::binary::le_u32_at;
use crate::cd::{CdEntry, PREGAP_SECTORS};

pub const ENTRY_SIZE: usize = 8;
pub const MAX_FILE_SIZE: u32 = 700 * 1024 * 1024;
/// Consecutive plausible entries the fallback search needs to accept a run.
pub const MIN_SCAN_RUN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlaEntry {
    pub timecode: Timecode,
    pub file_size: u32,
}

impl FlaEntry {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let timecode: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self {
            timecode: Timecode::from_bytes(timecode),
            file_size: le_u32_at(bytes, 4)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[..4].copy_from_slice(&self.timecode.to_bytes());
        out[4..].copy_from_slice(&self.file_size.to_le_bytes());
        out
    }

    pub fn is_plausible(&self) -> bool {
        self.timecode.is_plausible() && self.file_size > 0 && self.file_size <= MAX_FILE_SIZE
    }

    /// Logical sector the entry points at.
    pub fn lba(&self) -> Option<u32> {
        self.timecode
            .to_absolute_sector()?
            .checked_sub(PREGAP_SECTORS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaTable {
    /// Byte offset inside the executable.
    pub offset: u32,
    pub entries: Vec<FlaEntry>,
}

fn plausible_run(exe: &[u8], offset: usize) -> usize {
    exe.get(offset..)
        .unwrap_or_default()
        .chunks_exact(ENTRY_SIZE)
        .take_while(|chunk| FlaEntry::from_bytes(chunk).is_some_and(|e| e.is_plausible()))
        .count()
}

impl FlaTable {
    pub fn read(exe: &[u8], offset: u32, count: usize) -> Result<Self, FlaError> {
        let start = offset as usize;
        let end = start + count * ENTRY_SIZE;
        let bytes = exe
            .get(start..end)
            .ok_or(FlaError::TableTruncated { offset })?;
        let entries = bytes
            .chunks_exact(ENTRY_SIZE)
            .filter_map(FlaEntry::from_bytes)
            .collect();
        Ok(Self { offset, entries })
    }

    /// Finds the table at the configured offset, or failing that, the first
    /// run of `MIN_SCAN_RUN` plausible entries from `scan_start`.
    pub fn locate(exe: &[u8], options: &FlaOptions) -> Result<Self, FlaError> {
        let count = plausible_run(exe, options.table_offset as usize);
        if count > 0 {
            debug!("{} FLA entries at {:#X}", count, options.table_offset);
            return Self::read(exe, options.table_offset, count);
        }

        warn!(
            "no FLA entries at {:#X}, scanning from {:#X}",
            options.table_offset, options.scan_start
        );
        let mut pos = options.scan_start as usize;
        while pos + ENTRY_SIZE * MIN_SCAN_RUN <= exe.len() {
            let count = plausible_run(exe, pos);
            if count >= MIN_SCAN_RUN {
                info!("found {} FLA entries at {:#X}", count, pos);
                return Self::read(exe, pos as u32, count);
            }
            pos += 4;
        }

        Err(FlaError::TableNotFound {
            offset: options.table_offset,
            scan_start: options.scan_start,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|e| e.to_bytes()).collect()
    }

    /// Pairs each entry with the file whose directory timecode matches.
    pub fn link<'a>(&self, files: &'a [CdEntry]) -> Vec<Option<&'a CdEntry>> {
        let mut by_msf: HashMap<&str, &CdEntry> = HashMap::new();
        for file in files.iter().filter(|f| !f.is_dir) {
            by_msf.entry(file.msf.as_str()).or_insert(file);
        }
        self.entries
            .iter()
            .map(|e| by_msf.get(e.timecode.to_msf_string().as_str()).copied())
            .collect()
    }
}
