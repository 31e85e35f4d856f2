//! Read-only access to ISO 9660 filesystems inside PlayStation disc images.
//!
//! Both raw 2352-byte/sector `.bin` dumps (Mode 2 Form 1) and plain
//! 2048-byte/sector `.iso` files are accepted. Everything is read one sector
//! at a time, so image size does not matter.

use log::{debug, warn};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

pub const SECTOR_SIZE: u64 = 2048;
pub const RAW_SECTOR_SIZE: u64 = 2352;
/// 12 (sync) + 4 (header) + 8 (subheader).
pub const MODE2_FORM1_DATA_OFFSET: u64 = 24;
pub const PVD_SECTOR: u32 = 16;
/// Two-second lead-in every PSX timecode includes.
pub const PREGAP_SECTORS: u32 = 150;
pub const SECTORS_PER_SECOND: u32 = 75;

const CD_SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

const FLAG_DIRECTORY: u8 = 0x02;

#[derive(Debug, Error)]
pub enum CdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("sector {lba} (byte offset {offset:#X}) is beyond the end of the image")]
    SectorOutOfRange { lba: u32, offset: u64 },

    #[error("no ISO 9660 primary volume descriptor at sector 16 ({reason})")]
    NotIso9660 { reason: String },

    #[error("'{path}' not found on disc")]
    NotFound { path: String },
}

/// How logical 2048-byte sectors are stored in the image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscLayout {
    Iso2048,
    Raw2352,
}

impl DiscLayout {
    pub fn detect<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut head = [0u8; 12];
        let mut filled = 0;
        while filled < head.len() {
            let n = reader.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        reader.seek(SeekFrom::Start(0))?;

        Ok(if filled == head.len() && head == CD_SYNC_PATTERN {
            DiscLayout::Raw2352
        } else {
            DiscLayout::Iso2048
        })
    }

    pub fn sector_stride(self) -> u64 {
        match self {
            DiscLayout::Iso2048 => SECTOR_SIZE,
            DiscLayout::Raw2352 => RAW_SECTOR_SIZE,
        }
    }

    /// Byte offset of the user data of sector `lba`.
    pub fn sector_offset(self, lba: u32) -> u64 {
        match self {
            DiscLayout::Iso2048 => lba as u64 * SECTOR_SIZE,
            DiscLayout::Raw2352 => lba as u64 * RAW_SECTOR_SIZE + MODE2_FORM1_DATA_OFFSET,
        }
    }

    /// Maps a byte offset in the logical 2048-byte/sector space to the
    /// image file.
    pub fn physical_offset(self, logical: u64) -> u64 {
        match self {
            DiscLayout::Iso2048 => logical,
            DiscLayout::Raw2352 => {
                (logical / SECTOR_SIZE) * RAW_SECTOR_SIZE
                    + MODE2_FORM1_DATA_OFFSET
                    + logical % SECTOR_SIZE
            }
        }
    }

    /// Splits a logical byte range into `(physical offset, length)` runs
    /// that never cross a sector's user-data area.
    pub fn physical_runs(self, logical: u64, len: usize) -> Vec<(u64, usize)> {
        let mut runs = Vec::new();
        let mut pos = logical;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = match self {
                DiscLayout::Iso2048 => remaining,
                DiscLayout::Raw2352 => {
                    remaining.min((SECTOR_SIZE - pos % SECTOR_SIZE) as usize)
                }
            };
            runs.push((self.physical_offset(pos), chunk));
            pos += chunk as u64;
            remaining -= chunk;
        }
        runs
    }
}

/// `MM:SS:FF` in decimal for a logical sector, pregap included.
pub fn lba_to_msf_string(lba: u32) -> String {
    let abs = lba as u64 + PREGAP_SECTORS as u64;
    let per_second = SECTORS_PER_SECOND as u64;
    let frames = abs % per_second;
    let seconds = (abs / per_second) % 60;
    let minutes = abs / (per_second * 60);
    format!("{:02}:{:02}:{:02}", minutes, seconds, frames)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdEntry {
    /// Slash-separated path from the root, version suffix stripped.
    pub path: String,
    pub name: String,
    pub lba: u32,
    pub size: u32,
    pub is_dir: bool,
    pub msf: String,
}

impl CdEntry {
    pub fn sector_count(&self) -> u64 {
        (self.size as u64).div_ceil(SECTOR_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub system_identifier: String,
    pub volume_identifier: String,
    pub volume_space_size: u32,
    pub root_lba: u32,
    pub root_size: u32,
}

fn read_padded_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

struct DirectoryRecord {
    lba: u32,
    size: u32,
    flags: u8,
    identifier: Vec<u8>,
}

fn parse_directory_record(data: &[u8]) -> Option<DirectoryRecord> {
    let record_len = *data.first()? as usize;
    if record_len < 33 || data.len() < record_len {
        return None;
    }
    let lba = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
    let size = u32::from_le_bytes([data[10], data[11], data[12], data[13]]);
    let flags = data[25];
    let id_len = data[32] as usize;
    if 33 + id_len > record_len {
        return None;
    }
    Some(DirectoryRecord {
        lba,
        size,
        flags,
        identifier: data[33..33 + id_len].to_vec(),
    })
}

fn normalise_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .map(|part| part.split(';').next().unwrap_or(part).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join("/")
}

pub struct CdImage<R> {
    reader: R,
    layout: DiscLayout,
    volume: VolumeDescriptor,
}

impl CdImage<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CdError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> CdImage<R> {
    pub fn from_reader(mut reader: R) -> Result<Self, CdError> {
        let layout = DiscLayout::detect(&mut reader)?;
        let sector = read_sector_from(&mut reader, layout, PVD_SECTOR).map_err(|e| match e {
            CdError::SectorOutOfRange { .. } => CdError::NotIso9660 {
                reason: "image too small".to_string(),
            },
            other => other,
        })?;

        if sector[0] != 0x01 || &sector[1..6] != b"CD001" {
            return Err(CdError::NotIso9660 {
                reason: format!("descriptor type {:#04X}, id {:?}", sector[0], read_padded_str(&sector[1..6])),
            });
        }

        let root = &sector[156..190];
        let volume = VolumeDescriptor {
            system_identifier: read_padded_str(&sector[8..40]),
            volume_identifier: read_padded_str(&sector[40..72]),
            volume_space_size: u32::from_le_bytes([sector[80], sector[81], sector[82], sector[83]]),
            root_lba: u32::from_le_bytes([root[2], root[3], root[4], root[5]]),
            root_size: u32::from_le_bytes([root[10], root[11], root[12], root[13]]),
        };
        debug!(
            "disc '{}' ({:?}), {} sectors, root at {}",
            volume.volume_identifier, layout, volume.volume_space_size, volume.root_lba
        );

        Ok(Self {
            reader,
            layout,
            volume,
        })
    }

    pub fn layout(&self) -> DiscLayout {
        self.layout
    }

    pub fn volume(&self) -> &VolumeDescriptor {
        &self.volume
    }

    /// Image-file offset of a byte in the logical 2048-byte/sector space.
    pub fn logical_to_physical(&self, offset: u64) -> u64 {
        self.layout.physical_offset(offset)
    }

    pub fn read_sector(&mut self, lba: u32) -> Result<[u8; 2048], CdError> {
        read_sector_from(&mut self.reader, self.layout, lba)
    }

    /// `lba + step`, or the sector that would lie past the 32-bit range.
    fn advance(&self, lba: u32, step: u32) -> Result<u32, CdError> {
        lba.checked_add(step).ok_or(CdError::SectorOutOfRange {
            lba,
            offset: self.layout.sector_offset(lba) + step as u64 * self.layout.sector_stride(),
        })
    }

    /// Every file and directory on the disc, depth first.
    pub fn files(&mut self) -> Result<Vec<CdEntry>, CdError> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let (root_lba, root_size) = (self.volume.root_lba, self.volume.root_size);
        self.walk_directory(root_lba, root_size, "", &mut visited, &mut entries)?;
        Ok(entries)
    }

    fn walk_directory(
        &mut self,
        lba: u32,
        size: u32,
        prefix: &str,
        visited: &mut HashSet<u32>,
        entries: &mut Vec<CdEntry>,
    ) -> Result<(), CdError> {
        if !visited.insert(lba) {
            warn!("directory extent at sector {} visited twice, skipping", lba);
            return Ok(());
        }

        let sectors = (size as u64).div_ceil(SECTOR_SIZE) as u32;
        let mut subdirs = Vec::new();
        for i in 0..sectors {
            let sector_lba = self.advance(lba, i)?;
            let sector = self.read_sector(sector_lba)?;
            let mut pos = 0usize;
            while pos < sector.len() {
                let record_len = sector[pos] as usize;
                if record_len == 0 || pos + record_len > sector.len() {
                    break;
                }
                let record = parse_directory_record(&sector[pos..pos + record_len]);
                pos += record_len;

                let Some(record) = record else {
                    continue;
                };
                if record.identifier == [0x00] || record.identifier == [0x01] {
                    continue;
                }

                let raw_name = String::from_utf8_lossy(&record.identifier);
                let name = raw_name.split(';').next().unwrap_or(&raw_name).to_string();
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                let is_dir = record.flags & FLAG_DIRECTORY != 0;
                if record.lba.checked_add(PREGAP_SECTORS).is_none() {
                    warn!("'{}' claims sector {}, which no timecode can reach, skipping", path, record.lba);
                    continue;
                }

                let entry = CdEntry {
                    path,
                    name,
                    lba: record.lba,
                    size: record.size,
                    is_dir,
                    msf: lba_to_msf_string(record.lba),
                };
                if is_dir {
                    subdirs.push(entry.clone());
                }
                entries.push(entry);
            }
        }

        for dir in subdirs {
            self.walk_directory(dir.lba, dir.size, &dir.path, visited, entries)?;
        }
        Ok(())
    }

    /// Case-insensitive lookup by path (`EXE/MAIN0.EXE`, `;1` optional).
    pub fn find(&mut self, path: &str) -> Result<CdEntry, CdError> {
        let wanted = normalise_path(path);
        self.files()?
            .into_iter()
            .find(|e| normalise_path(&e.path) == wanted)
            .ok_or_else(|| CdError::NotFound {
                path: path.to_string(),
            })
    }

    /// Streams a file's contents to `out`, one sector at a time.
    pub fn extract_to<W: Write>(&mut self, entry: &CdEntry, out: &mut W) -> Result<u64, CdError> {
        let mut remaining = entry.size as u64;
        let mut lba = entry.lba;
        while remaining > 0 {
            let sector = self.read_sector(lba)?;
            let take = remaining.min(SECTOR_SIZE) as usize;
            out.write_all(&sector[..take])?;
            remaining -= take as u64;
            if remaining > 0 {
                lba = self.advance(lba, 1)?;
            }
        }
        Ok(entry.size as u64)
    }

    pub fn read_file(&mut self, entry: &CdEntry) -> Result<Vec<u8>, CdError> {
        let mut data = Vec::with_capacity(entry.size as usize);
        self.extract_to(entry, &mut data)?;
        Ok(data)
    }
}

fn read_sector_from<R: Read + Seek>(
    reader: &mut R,
    layout: DiscLayout,
    lba: u32,
) -> Result<[u8; 2048], CdError> {
    let offset = layout.sector_offset(lba);
    reader.seek(SeekFrom::Start(offset))?;
    let mut data = [0u8; 2048];
    reader.read_exact(&mut data).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CdError::SectorOutOfRange { lba, offset }
        } else {
            CdError::Io(e)
        }
    })?;
    Ok(data)
}


#[cfg(test)]
mod tests {
    use super::testdisc::{build, file};
    use super::*;
    use std::io::Cursor;

    fn sample(layout: DiscLayout) -> Vec<u8> {
        build(
            &[
                file("", "SYSTEM.CNF", b"BOOT = cdrom:\\EXE\\MAIN0.EXE;1".to_vec()),
                file("EXE", "MAIN0.EXE", (0..5000u32).map(|i| i as u8).collect()),
                file("DATA", "FONT.WFM", vec![0xAB; 2048]),
            ],
            layout,
        )
    }

    #[test]
    fn detects_layout() {
        let raw = sample(DiscLayout::Raw2352);
        let iso = sample(DiscLayout::Iso2048);
        assert_eq!(DiscLayout::detect(&mut Cursor::new(&raw)).unwrap(), DiscLayout::Raw2352);
        assert_eq!(DiscLayout::detect(&mut Cursor::new(&iso)).unwrap(), DiscLayout::Iso2048);
    }

    #[test]
    fn lists_files_recursively_in_both_layouts() {
        for layout in [DiscLayout::Iso2048, DiscLayout::Raw2352] {
            let mut cd = CdImage::from_reader(Cursor::new(sample(layout))).unwrap();
            assert_eq!(cd.volume().system_identifier, "PLAYSTATION");
            let files = cd.files().unwrap();
            let paths: Vec<&str> = files.iter().map(|e| e.path.as_str()).collect();
            assert!(paths.contains(&"EXE"));
            assert!(paths.contains(&"SYSTEM.CNF"));
            assert!(paths.contains(&"EXE/MAIN0.EXE"));
            assert!(paths.contains(&"DATA/FONT.WFM"));

            let exe = cd.find("exe/main0.exe;1").unwrap();
            assert!(!exe.is_dir);
            assert_eq!(exe.size, 5000);
            assert_eq!(exe.sector_count(), 3);
            let data = cd.read_file(&exe).unwrap();
            assert_eq!(data.len(), 5000);
            assert_eq!(data[4097], (4097u32 & 0xFF) as u8);
        }
    }

    #[test]
    fn msf_includes_pregap() {
        assert_eq!(lba_to_msf_string(0), "00:02:00");
        assert_eq!(lba_to_msf_string(16), "00:02:16");
        assert_eq!(lba_to_msf_string(75 * 60 - 150), "01:00:00");
    }

    #[test]
    fn missing_file_and_non_iso_are_errors() {
        let mut cd = CdImage::from_reader(Cursor::new(sample(DiscLayout::Iso2048))).unwrap();
        assert!(matches!(cd.find("EXE/MAIN1.EXE"), Err(CdError::NotFound { .. })));
        assert!(matches!(
            CdImage::from_reader(Cursor::new(vec![0u8; 2048 * 20])),
            Err(CdError::NotIso9660 { .. })
        ));
        assert!(matches!(
            CdImage::from_reader(Cursor::new(vec![0u8; 100])),
            Err(CdError::NotIso9660 { .. })
        ));
    }

    /// Rewrites both-endian LBA fields of the root directory record named
    /// `id`.
    fn set_record_lba(image: &mut [u8], layout: DiscLayout, id: &[u8], lba: u32) {
        let start = layout.sector_offset(18) as usize;
        let root = &image[start..start + 2048];
        let at = root.windows(id.len()).position(|w| w == id).unwrap();
        let record = start + at - 33;
        image[record + 2..record + 6].copy_from_slice(&lba.to_le_bytes());
        image[record + 6..record + 10].copy_from_slice(&lba.to_be_bytes());
    }

    #[test]
    fn record_at_last_sector_is_skipped() {
        for layout in [DiscLayout::Iso2048, DiscLayout::Raw2352] {
            let mut image = build(
                &[file("", "A.BIN", vec![1; 100]), file("", "B.BIN", vec![2; 100])],
                layout,
            );
            set_record_lba(&mut image, layout, b"A.BIN;1", u32::MAX);
            let mut cd = CdImage::from_reader(Cursor::new(image)).unwrap();
            let files = cd.files().unwrap();
            let paths: Vec<&str> = files.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(paths, vec!["B.BIN"]);
        }
    }

    #[test]
    fn root_beyond_image_is_an_error() {
        let mut image = build(&[file("", "A.BIN", vec![1; 100])], DiscLayout::Iso2048);
        let pvd = PVD_SECTOR as usize * 2048;
        image[pvd + 156 + 2..pvd + 156 + 6].copy_from_slice(&u32::MAX.to_le_bytes());
        image[pvd + 156 + 10..pvd + 156 + 14].copy_from_slice(&4096u32.to_le_bytes());
        let mut cd = CdImage::from_reader(Cursor::new(image)).unwrap();
        assert!(matches!(
            cd.files(),
            Err(CdError::SectorOutOfRange { lba: u32::MAX, .. })
        ));
    }

    #[test]
    fn extent_past_last_sector_is_an_error() {
        let cd = CdImage::from_reader(Cursor::new(sample(DiscLayout::Iso2048))).unwrap();
        assert!(matches!(cd.advance(u32::MAX, 1), Err(CdError::SectorOutOfRange { lba: u32::MAX, .. })));
        assert_eq!(cd.advance(10, 2).unwrap(), 12);
        assert_eq!(lba_to_msf_string(u32::MAX), "954437:12:45");
    }

    #[test]
    fn raw_runs_split_at_sector_boundaries() {
        let runs = DiscLayout::Raw2352.physical_runs(2040, 20);
        assert_eq!(runs, vec![(24 + 2040, 8), (2352 + 24, 12)]);
        let runs = DiscLayout::Iso2048.physical_runs(2040, 20);
        assert_eq!(runs, vec![(2040, 20)]);
    }
}
