use log::{debug, info, warn};
use std::collections::HashMap;

use super::{FlaError, FlaTable};
use crate::cd::{CdEntry, SECTOR_SIZE};

/// A linked file whose size differs between the two discs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaDifference {
    pub entry_index: usize,
    pub path: String,
    pub old_size: u32,
    pub new_size: u32,
    pub size_changed: bool,
    pub timecode_changed: bool,
    pub description: String,
}

impl FlaDifference {
    pub fn size_delta(&self) -> i64 {
        self.new_size as i64 - self.old_size as i64
    }
}

/// Whole sectors covering `bytes`, rounded towards positive infinity.
pub fn sector_delta(bytes: i64) -> i64 {
    let sector = SECTOR_SIZE as i64;
    bytes.div_euclid(sector) + i64::from(bytes.rem_euclid(sector) != 0)
}

pub fn compare(
    original: &FlaTable,
    modified: &FlaTable,
    original_files: &[CdEntry],
    modified_files: &[CdEntry],
) -> Result<Vec<FlaDifference>, FlaError> {
    if original.len() != modified.len() {
        return Err(FlaError::EntryCountMismatch {
            original: original.len(),
            modified: modified.len(),
        });
    }

    let by_path: HashMap<String, &CdEntry> = modified_files
        .iter()
        .filter(|f| !f.is_dir)
        .map(|f| (f.path.to_ascii_uppercase(), f))
        .collect();

    let mut differences = Vec::new();
    for (index, link) in original.link(original_files).into_iter().enumerate() {
        let Some(old) = link else {
            debug!(
                "entry {} ({}) has no file on the original disc",
                index, original.entries[index].timecode
            );
            continue;
        };
        let Some(new) = by_path.get(&old.path.to_ascii_uppercase()) else {
            warn!("{} is missing from the modified disc, skipping entry {}", old.path, index);
            continue;
        };
        if new.size == old.size {
            continue;
        }

        let description = format!(
            "{}: {} -> {} bytes ({:+})",
            old.path,
            old.size,
            new.size,
            new.size as i64 - old.size as i64
        );
        info!("entry {}: {}", index, description);
        differences.push(FlaDifference {
            entry_index: index,
            path: old.path.clone(),
            old_size: old.size,
            new_size: new.size,
            size_changed: true,
            timecode_changed: new.msf != old.msf,
            description,
        });
    }
    Ok(differences)
}

/// Applies `differences` to a copy of `modified`: resized entries take their
/// new size, and every later entry moves by the sectors the running size
/// change covers.
pub fn recalculate(
    differences: &[FlaDifference],
    original: &FlaTable,
    modified: &FlaTable,
    original_files: &[CdEntry],
    shift_unlinked: bool,
) -> Result<FlaTable, FlaError> {
    let linked: Vec<bool> = original
        .link(original_files)
        .iter()
        .map(Option::is_some)
        .collect();

    let mut ordered: Vec<&FlaDifference> = differences.iter().collect();
    ordered.sort_by_key(|d| d.entry_index);

    let mut table = modified.clone();
    let mut cumulative = 0i64;
    let mut pending = ordered.iter().peekable();

    for index in 0..table.entries.len() {
        // An entry's own growth moves only what follows it.
        let delta = sector_delta(cumulative);

        let entry = &mut table.entries[index];
        while let Some(diff) = pending.next_if(|d| d.entry_index <= index) {
            if diff.entry_index == index {
                entry.file_size = diff.new_size;
            }
            cumulative += diff.size_delta();
        }

        if delta == 0 {
            continue;
        }
        if !linked.get(index).copied().unwrap_or(false) && !shift_unlinked {
            debug!("entry {} is unlinked, leaving it at {}", index, entry.timecode);
            continue;
        }
        entry.timecode = entry
            .timecode
            .shifted(delta)
            .ok_or(FlaError::TimecodeOutOfRange { index, delta })?;
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cd::{lba_to_msf_string, PREGAP_SECTORS};
    use crate::fla::{FlaEntry, Timecode};

    fn file(path: &str, lba: u32, size: u32) -> CdEntry {
        CdEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            lba,
            size,
            is_dir: false,
            msf: lba_to_msf_string(lba),
        }
    }

    fn table_for(files: &[CdEntry]) -> FlaTable {
        FlaTable {
            offset: 0,
            entries: files
                .iter()
                .map(|f| FlaEntry {
                    timecode: Timecode::from_absolute_sector(f.lba + PREGAP_SECTORS, 0).unwrap(),
                    file_size: f.size,
                })
                .collect(),
        }
    }

    fn original_files() -> Vec<CdEntry> {
        vec![
            file("DATA/A.BIN", 30, 3000),
            file("DATA/B.BIN", 32, 4096),
            file("DATA/C.BIN", 34, 100),
            file("EXE/MAIN0.EXE", 35, 9000),
        ]
    }

    #[test]
    fn sector_delta_rounds_up() {
        assert_eq!(sector_delta(0), 0);
        assert_eq!(sector_delta(1), 1);
        assert_eq!(sector_delta(512), 1);
        assert_eq!(sector_delta(2048), 1);
        assert_eq!(sector_delta(2049), 2);
        assert_eq!(sector_delta(-512), 0);
        assert_eq!(sector_delta(-2048), -1);
        assert_eq!(sector_delta(-2049), -1);
    }

    #[test]
    fn one_grown_file_shifts_everything_after_it() {
        let orig_files = original_files();
        let mut mod_files = orig_files.clone();
        mod_files[0].size += 512;
        let original = table_for(&orig_files);
        let modified = original.clone();

        let diffs = compare(&original, &modified, &orig_files, &mod_files).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].entry_index, 0);
        assert_eq!(diffs[0].size_delta(), 512);
        assert!(!diffs[0].timecode_changed);

        let patched = recalculate(&diffs, &original, &modified, &orig_files, false).unwrap();
        assert_eq!(patched.entries[0].file_size, 3512);
        assert_eq!(patched.entries[0].timecode, original.entries[0].timecode);
        for i in 1..original.len() {
            let before = original.entries[i].timecode.to_absolute_sector().unwrap();
            let after = patched.entries[i].timecode.to_absolute_sector().unwrap();
            assert_eq!(after, before + 1, "entry {}", i);
            assert_eq!(patched.entries[i].file_size, original.entries[i].file_size);
        }
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let files = original_files();
        let original = table_for(&files);
        let mut modified = original.clone();
        modified.entries.pop();
        assert!(matches!(
            compare(&original, &modified, &files, &files),
            Err(FlaError::EntryCountMismatch {
                original: 4,
                modified: 3
            })
        ));
    }

    #[test]
    fn missing_files_are_skipped() {
        let orig_files = original_files();
        let mut mod_files = orig_files.clone();
        mod_files.remove(1);
        mod_files[0].size = 10;
        let original = table_for(&orig_files);
        let diffs = compare(&original, &original, &orig_files, &mod_files).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "DATA/A.BIN");
    }

    #[test]
    fn order_is_preserved_after_recalculation() {
        let orig_files: Vec<CdEntry> = (0..12)
            .map(|i| file(&format!("DATA/F{:02}.BIN", i), 30 + i * 4, 2048 * 3 + i))
            .collect();
        let mut mod_files = orig_files.clone();
        for (i, f) in mod_files.iter_mut().enumerate() {
            if i % 3 == 1 {
                f.size += 700 * i as u32;
            }
        }
        let original = table_for(&orig_files);
        let diffs = compare(&original, &original, &orig_files, &mod_files).unwrap();
        assert_eq!(diffs.len(), 4);

        let patched = recalculate(&diffs, &original, &original, &orig_files, false).unwrap();
        let sectors: Vec<u32> = patched
            .entries
            .iter()
            .map(|e| e.timecode.to_absolute_sector().unwrap())
            .collect();
        assert!(sectors.windows(2).all(|w| w[0] <= w[1]), "{:?}", sectors);
    }

    #[test]
    fn unlinked_entries_shift_only_when_asked() {
        let orig_files = original_files();
        let mut mod_files = orig_files.clone();
        mod_files[0].size += 4096;
        let mut original = table_for(&orig_files);
        // An entry pointing at nothing on the disc.
        original.entries.push(FlaEntry {
            timecode: Timecode::from_absolute_sector(400, 0).unwrap(),
            file_size: 77,
        });
        let diffs = compare(&original, &original, &orig_files, &mod_files).unwrap();

        let kept = recalculate(&diffs, &original, &original, &orig_files, false).unwrap();
        assert_eq!(kept.entries[4], original.entries[4]);
        assert_eq!(kept.entries[3].timecode.to_absolute_sector(), Some(35 + 150 + 2));

        let shifted = recalculate(&diffs, &original, &original, &orig_files, true).unwrap();
        assert_eq!(shifted.entries[4].timecode.to_absolute_sector(), Some(402));
    }
}
