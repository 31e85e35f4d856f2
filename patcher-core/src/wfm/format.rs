use log::{debug, warn};
use std::io::Cursor;

use super::dialogue::arg_count;
use super::WfmError;
use crate::binary::BinaryReader;
use crate::psx::Tile;

pub const WFM_MAGIC: &[u8; 4] = b"WFM3";
pub const RESERVED_LEN: usize = 128;
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 2 + 2 + RESERVED_LEN;
pub const GLYPH_HEADER_SIZE: usize = 8;
pub const MAX_SPECIAL_DIALOGUES: usize = RESERVED_LEN / 2;

pub const TERMINATOR_1: u16 = 0xFFFE;
pub const TERMINATOR_2: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WfmHeader {
    pub magic: [u8; 4],
    pub padding: u32,
    pub dialogue_pointer_table: u32,
    pub total_dialogues: u16,
    pub total_glyphs: u16,
    pub reserved: [u8; RESERVED_LEN],
}

impl Default for WfmHeader {
    fn default() -> Self {
        Self {
            magic: *WFM_MAGIC,
            padding: 0,
            dialogue_pointer_table: 0,
            total_dialogues: 0,
            total_glyphs: 0,
            reserved: [0u8; RESERVED_LEN],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Glyph {
    pub clut: u16,
    pub height: u16,
    pub width: u16,
    pub handakuten: u16,
    pub image: Vec<u8>,
}

impl Glyph {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn tile(&self) -> Tile {
        Tile::from_data(self.width, self.height, self.image.clone())
    }

    fn encoded_len(&self) -> usize {
        GLYPH_HEADER_SIZE + self.image.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// 0xFFFE
    Short,
    /// 0xFFFF
    Long,
}

impl Terminator {
    pub fn from_word(word: u16) -> Option<Self> {
        match word {
            TERMINATOR_1 => Some(Terminator::Short),
            TERMINATOR_2 => Some(Terminator::Long),
            _ => None,
        }
    }

    pub fn word(self) -> u16 {
        match self {
            Terminator::Short => TERMINATOR_1,
            Terminator::Long => TERMINATOR_2,
        }
    }

    /// Numbering used by the interchange document: 1 or 2.
    pub fn number(self) -> u8 {
        match self {
            Terminator::Short => 1,
            Terminator::Long => 2,
        }
    }
}

/// A dialogue's word stream without its terminator. `terminator == None`
/// marks a null table pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDialogue {
    pub words: Vec<u16>,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WfmFile {
    pub header: WfmHeader,
    pub glyphs: Vec<Glyph>,
    pub dialogues: Vec<RawDialogue>,
}

fn truncated(what: &'static str, offset: u64) -> impl FnOnce(std::io::Error) -> WfmError {
    move |source| WfmError::Truncated {
        what,
        offset,
        source,
    }
}

fn read_header(r: &mut BinaryReader<Cursor<&[u8]>>) -> Result<WfmHeader, WfmError> {
    let magic: [u8; 4] = r.read_array().map_err(truncated("header", 0))?;
    if &magic != WFM_MAGIC {
        return Err(WfmError::BadMagic { found: magic });
    }

    let padding = r.read_u32_le().map_err(truncated("header", 4))?;
    let dialogue_pointer_table = r.read_u32_le().map_err(truncated("header", 8))?;
    let total_dialogues = r.read_u16_le().map_err(truncated("header", 12))?;
    let total_glyphs = r.read_u16_le().map_err(truncated("header", 14))?;
    let reserved: [u8; RESERVED_LEN] = r.read_array().map_err(truncated("header", 16))?;

    Ok(WfmHeader {
        magic,
        padding,
        dialogue_pointer_table,
        total_dialogues,
        total_glyphs,
        reserved,
    })
}

fn read_glyph(r: &mut BinaryReader<Cursor<&[u8]>>, offset: u64) -> std::io::Result<Glyph> {
    r.seek_to(offset)?;
    let clut = r.read_u16_le()?;
    let height = r.read_u16_le()?;
    let width = r.read_u16_le()?;
    let handakuten = r.read_u16_le()?;
    let image = if width == 0 || height == 0 {
        Vec::new()
    } else {
        r.read_bytes(Tile::byte_len(width, height))?
    };

    Ok(Glyph {
        clut,
        height,
        width,
        handakuten,
        image,
    })
}

fn read_dialogue(
    r: &mut BinaryReader<Cursor<&[u8]>>,
    index: usize,
    offset: u64,
) -> Result<RawDialogue, WfmError> {
    let overrun = |_| WfmError::UnterminatedDialogue { index, offset };
    r.seek_to(offset).map_err(overrun)?;

    let mut words = Vec::new();
    loop {
        let word = r.read_u16_le().map_err(overrun)?;
        if let Some(terminator) = Terminator::from_word(word) {
            return Ok(RawDialogue {
                words,
                terminator: Some(terminator),
            });
        }
        words.push(word);
        for _ in 0..arg_count(word) {
            words.push(r.read_u16_le().map_err(overrun)?);
        }
    }
}

impl WfmFile {
    /// Decodes a complete WFM3 file. Header and pointer-table damage is
    /// fatal; an unreadable glyph record is replaced by an empty glyph.
    pub fn parse(raw: &[u8]) -> Result<Self, WfmError> {
        let mut r = BinaryReader::new(Cursor::new(raw));
        let header = read_header(&mut r)?;

        let table_start = HEADER_SIZE as u64;
        let mut glyph_pointers = Vec::with_capacity(header.total_glyphs as usize);
        for i in 0..header.total_glyphs as u64 {
            let ptr = r
                .read_u16_le()
                .map_err(truncated("glyph pointer table", table_start + i * 2))?;
            glyph_pointers.push(ptr);
        }

        let mut glyphs = Vec::with_capacity(glyph_pointers.len());
        for (i, &ptr) in glyph_pointers.iter().enumerate() {
            match read_glyph(&mut r, ptr as u64) {
                Ok(glyph) => glyphs.push(glyph),
                Err(e) => {
                    warn!("glyph {} at {:#X} unreadable ({}), using empty glyph", i, ptr, e);
                    glyphs.push(Glyph::default());
                }
            }
        }

        let dialogue_table = header.dialogue_pointer_table as u64;
        r.seek_to(dialogue_table)
            .map_err(truncated("dialogue pointer table", dialogue_table))?;
        let mut dialogue_pointers = Vec::with_capacity(header.total_dialogues as usize);
        for i in 0..header.total_dialogues as u64 {
            let ptr = r
                .read_u16_le()
                .map_err(truncated("dialogue pointer table", dialogue_table + i * 2))?;
            dialogue_pointers.push(ptr);
        }

        let mut dialogues = Vec::with_capacity(dialogue_pointers.len());
        for (i, &ptr) in dialogue_pointers.iter().enumerate() {
            if ptr == 0 {
                debug!("dialogue {} has a null pointer", i);
                dialogues.push(RawDialogue::default());
                continue;
            }
            dialogues.push(read_dialogue(&mut r, i, dialogue_table + ptr as u64)?);
        }

        Ok(Self {
            header,
            glyphs,
            dialogues,
        })
    }

    /// Serialises the file, recomputing every pointer and count in the
    /// header. Records are padded to 2-byte alignment.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WfmError> {
        let total_glyphs = u16::try_from(self.glyphs.len())
            .map_err(|_| WfmError::TooManyGlyphs {
                count: self.glyphs.len(),
            })?;
        let total_dialogues =
            u16::try_from(self.dialogues.len()).map_err(|_| WfmError::PointerOverflow {
                what: "dialogue count",
                offset: self.dialogues.len(),
            })?;

        let glyph_table = HEADER_SIZE;
        let mut cursor = glyph_table + self.glyphs.len() * 2;
        let mut glyph_pointers = Vec::with_capacity(self.glyphs.len());
        for glyph in &self.glyphs {
            let ptr = u16::try_from(cursor).map_err(|_| WfmError::PointerOverflow {
                what: "glyph record",
                offset: cursor,
            })?;
            glyph_pointers.push(ptr);
            cursor += glyph.encoded_len();
            cursor += cursor % 2;
        }

        let dialogue_table = cursor;
        let mut cursor = dialogue_table + self.dialogues.len() * 2;
        let mut dialogue_pointers = Vec::with_capacity(self.dialogues.len());
        for dialogue in &self.dialogues {
            match dialogue.terminator {
                None => dialogue_pointers.push(0u16),
                Some(_) => {
                    let rel = cursor - dialogue_table;
                    let ptr = u16::try_from(rel).map_err(|_| WfmError::PointerOverflow {
                        what: "dialogue stream",
                        offset: cursor,
                    })?;
                    dialogue_pointers.push(ptr);
                    cursor += (dialogue.words.len() + 1) * 2;
                }
            }
        }

        let mut out = Vec::with_capacity(cursor);
        out.extend_from_slice(WFM_MAGIC);
        out.extend_from_slice(&self.header.padding.to_le_bytes());
        out.extend_from_slice(&(dialogue_table as u32).to_le_bytes());
        out.extend_from_slice(&total_dialogues.to_le_bytes());
        out.extend_from_slice(&total_glyphs.to_le_bytes());
        out.extend_from_slice(&self.header.reserved);

        for ptr in &glyph_pointers {
            out.extend_from_slice(&ptr.to_le_bytes());
        }
        for glyph in &self.glyphs {
            out.extend_from_slice(&glyph.clut.to_le_bytes());
            out.extend_from_slice(&glyph.height.to_le_bytes());
            out.extend_from_slice(&glyph.width.to_le_bytes());
            out.extend_from_slice(&glyph.handakuten.to_le_bytes());
            out.extend_from_slice(&glyph.image);
            if out.len() % 2 != 0 {
                out.push(0);
            }
        }

        debug_assert_eq!(out.len(), dialogue_table);
        for ptr in &dialogue_pointers {
            out.extend_from_slice(&ptr.to_le_bytes());
        }
        for dialogue in &self.dialogues {
            if let Some(terminator) = dialogue.terminator {
                for word in &dialogue.words {
                    out.extend_from_slice(&word.to_le_bytes());
                }
                out.extend_from_slice(&terminator.word().to_le_bytes());
            }
        }

        Ok(out)
    }
}

/// Reads the special-dialogue ids packed into the header's reserved
/// section. Slot 0 holding 0 only counts when a later slot is set, since
/// an all-zero section means "none".
pub fn decode_special_dialogues(reserved: &[u8], total_dialogues: u16) -> Result<Vec<u16>, WfmError> {
    if reserved.len() != RESERVED_LEN {
        return Err(WfmError::ReservedSectionLength {
            len: reserved.len(),
        });
    }

    let slots: Vec<u16> = reserved
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let later_nonzero = slots.iter().skip(1).any(|&s| s != 0);

    let mut ids = Vec::new();
    for (i, &id) in slots.iter().enumerate() {
        if id == 0 {
            if i == 0 && later_nonzero {
                ids.push(0);
                continue;
            }
            break;
        }
        if id >= total_dialogues {
            warn!(
                "special dialogue id {} out of range (total {}), ignoring",
                id, total_dialogues
            );
            continue;
        }
        ids.push(id);
    }

    Ok(ids)
}

pub fn encode_special_dialogues(ids: &[u16]) -> Result<[u8; RESERVED_LEN], WfmError> {
    if ids.len() > MAX_SPECIAL_DIALOGUES {
        return Err(WfmError::TooManySpecialDialogues { count: ids.len() });
    }

    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted == [0] {
        warn!("dialogue 0 alone cannot be marked special; the reserved section would read as empty");
    }

    let mut reserved = [0u8; RESERVED_LEN];
    for (slot, id) in sorted.iter().enumerate() {
        reserved[slot * 2..slot * 2 + 2].copy_from_slice(&id.to_le_bytes());
    }
    Ok(reserved)
}
