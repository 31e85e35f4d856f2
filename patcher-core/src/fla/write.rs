use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{compare, recalculate, FlaDifference, FlaError, FlaOptions, FlaTable};
use crate::cd::{CdEntry, CdImage, DiscLayout, SECTOR_SIZE};

/// An image file that can be forced to stable storage.
trait SyncTarget: Read + Write + Seek {
    fn sync(&mut self) -> io::Result<()>;
}

impl SyncTarget for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// The FLA table of one disc plus the listing it links against.
#[derive(Debug, Clone)]
pub struct DiscTable {
    pub layout: DiscLayout,
    pub executable: CdEntry,
    pub files: Vec<CdEntry>,
    pub table: FlaTable,
}

pub fn read_table_from_image(image: &Path, options: &FlaOptions) -> Result<DiscTable, FlaError> {
    let mut cd = CdImage::open(image)?;
    let executable = cd.find(&options.executable_path)?;
    let exe = cd.read_file(&executable)?;
    let table = FlaTable::locate(&exe, options)?;
    let files = cd.files()?;
    info!(
        "{}: {} FLA entries at {}+{:#X}",
        image.display(),
        table.len(),
        executable.path,
        table.offset
    );
    Ok(DiscTable {
        layout: cd.layout(),
        executable,
        files,
        table,
    })
}

fn read_runs<F: Read + Seek>(file: &mut F, runs: &[(u64, usize)]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for &(offset, len) in runs {
        file.seek(SeekFrom::Start(offset))?;
        let start = out.len();
        out.resize(start + len, 0);
        file.read_exact(&mut out[start..])?;
    }
    Ok(out)
}

fn write_runs<F: Write + Seek>(file: &mut F, runs: &[(u64, usize)], data: &[u8]) -> Result<(), FlaError> {
    let mut pos = 0;
    for &(offset, len) in runs {
        let chunk = &data[pos..pos + len];
        file.seek(SeekFrom::Start(offset))?;
        let written = file.write(chunk)?;
        if written != len {
            return Err(FlaError::PartialWrite {
                offset,
                written,
                expected: len,
            });
        }
        pos += len;
    }
    file.flush()?;
    Ok(())
}

fn mismatch_offset(runs: &[(u64, usize)], expected: &[u8], actual: &[u8]) -> u64 {
    let index = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .unwrap_or(0);
    let mut skipped = 0;
    for &(offset, len) in runs {
        if index < skipped + len {
            return offset + (index - skipped) as u64;
        }
        skipped += len;
    }
    runs.first().map_or(0, |r| r.0)
}

fn write_verified<F: SyncTarget>(
    file: &mut F,
    runs: &[(u64, usize)],
    data: &[u8],
    verify: bool,
) -> Result<(), FlaError> {
    let backup = read_runs(file, runs)?;
    if let Err(err) = write_runs(file, runs, data) {
        warn!("{}, restoring original bytes", err);
        write_runs(file, runs, &backup)?;
        file.sync()?;
        return Err(err);
    }
    file.sync()?;

    if !verify {
        return Ok(());
    }
    let readback = read_runs(file, runs)?;
    if readback != data {
        let offset = mismatch_offset(runs, data, &readback);
        warn!("verification failed at {:#X}, restoring original bytes", offset);
        write_runs(file, runs, &backup)?;
        file.sync()?;
        return Err(FlaError::VerificationFailed { offset });
    }
    info!("verified {} bytes", data.len());
    Ok(())
}

/// Writes `table` over the executable's copy inside the image and returns
/// the physical offset of the first byte written.
pub fn write_table(image: &Path, table: &FlaTable, options: &FlaOptions) -> Result<u64, FlaError> {
    let (layout, executable) = {
        let mut cd = CdImage::open(image)?;
        let executable = cd.find(&options.executable_path)?;
        (cd.layout(), executable)
    };

    let logical = executable.lba as u64 * SECTOR_SIZE + table.offset as u64;
    let data = table.to_bytes();
    let runs = layout.physical_runs(logical, data.len());

    let mut file = OpenOptions::new().read(true).write(true).open(image)?;
    let image_len = file.metadata()?.len();
    for &(offset, len) in &runs {
        if offset + len as u64 > image_len {
            return Err(FlaError::OffsetBeyondImage { offset, image_len });
        }
    }
    let start = runs.first().map_or(logical, |r| r.0);

    if layout == DiscLayout::Raw2352 {
        warn!("raw image: EDC/ECC of the patched sectors is not regenerated");
    }
    info!(
        "writing {} FLA entries ({} bytes) at {:#X} in {}",
        table.len(),
        data.len(),
        start,
        image.display()
    );
    write_verified(&mut file, &runs, &data, options.verify)?;
    Ok(start)
}

#[derive(Debug, Clone)]
pub struct PatchReport {
    pub table: FlaTable,
    pub differences: Vec<FlaDifference>,
    /// Physical offset the table was written at, `None` if nothing was written.
    pub written_at: Option<u64>,
}

/// Compares both discs and patches the modified image's table in place.
pub fn patch_image(original: &Path, modified: &Path, options: &FlaOptions) -> Result<PatchReport, FlaError> {
    let orig = read_table_from_image(original, options)?;
    let modi = read_table_from_image(modified, options)?;

    let differences = compare(&orig.table, &modi.table, &orig.files, &modi.files)?;
    if differences.is_empty() {
        info!("no linked file changed size, nothing to patch");
        return Ok(PatchReport {
            table: modi.table,
            differences,
            written_at: None,
        });
    }

    let table = recalculate(
        &differences,
        &orig.table,
        &modi.table,
        &orig.files,
        options.shift_unlinked,
    )?;

    if options.dry_run {
        info!("dry run, {} differences not written", differences.len());
        return Ok(PatchReport {
            table,
            differences,
            written_at: None,
        });
    }

    let written_at = write_table(modified, &table, options)?;
    Ok(PatchReport {
        table,
        differences,
        written_at: Some(written_at),
    })
}
