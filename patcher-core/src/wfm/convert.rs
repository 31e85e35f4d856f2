use image::RgbaImage;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::dialogue::{decode_dialogue, encode_dialogue, tokenize_text, TextToken, GLYPH_ID_BASE, GLYPH_ID_MAX};
use super::document::{Content, DialogueDocument, DialogueEntry};
use super::font::{font_file_name, glyph_image, FontGlyph, FontIndex};
use super::format::{decode_special_dialogues, encode_special_dialogues, Glyph, RawDialogue, Terminator, WfmFile, WfmHeader};
use super::WfmError;
use crate::psx::{palette_for_height, Tile};

/// Where glyph images go on decode and where reference glyphs come from.
pub trait GlyphStore {
    fn export_glyph(&self, index: usize, image: &RgbaImage) -> Result<(), WfmError>;

    /// Every glyph of the reference font, for fingerprint matching.
    fn font_glyphs(&self) -> Result<Vec<FontGlyph>, WfmError>;

    fn font_glyph(&self, ch: char, height: u16) -> Result<Option<RgbaImage>, WfmError>;
}

/// Persistence for the interchange document.
pub trait DocumentStore {
    fn save(&self, doc: &DialogueDocument) -> Result<(), WfmError>;
    fn load(&self) -> Result<DialogueDocument, WfmError>;
}

/// PNG files on disk: `glyph_%04d.png` exports and a font tree laid out as
/// `<font_dir>/<height>/<HEX>.png`.
#[derive(Debug, Clone, Default)]
pub struct PngGlyphStore {
    pub glyph_dir: Option<PathBuf>,
    pub font_dir: Option<PathBuf>,
}

impl PngGlyphStore {
    pub fn new(glyph_dir: Option<PathBuf>, font_dir: Option<PathBuf>) -> Self {
        Self {
            glyph_dir,
            font_dir,
        }
    }
}

fn parse_font_path(path: &Path) -> Option<(char, u16)> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("png") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let ch = char::from_u32(u32::from_str_radix(stem, 16).ok()?)?;
    let height = path.parent()?.file_name()?.to_str()?.parse::<u16>().ok()?;
    Some((ch, height))
}

impl GlyphStore for PngGlyphStore {
    fn export_glyph(&self, index: usize, image: &RgbaImage) -> Result<(), WfmError> {
        let Some(dir) = &self.glyph_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        image.save(dir.join(format!("glyph_{:04}.png", index)))?;
        Ok(())
    }

    fn font_glyphs(&self) -> Result<Vec<FontGlyph>, WfmError> {
        let Some(dir) = &self.font_dir else {
            return Ok(Vec::new());
        };

        let mut glyphs = Vec::new();
        for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some((ch, height)) = parse_font_path(entry.path()) else {
                debug!("skipping {} in font tree", entry.path().display());
                continue;
            };
            let image = image::open(entry.path())?.to_rgba8();
            glyphs.push(FontGlyph { ch, height, image });
        }
        Ok(glyphs)
    }

    fn font_glyph(&self, ch: char, height: u16) -> Result<Option<RgbaImage>, WfmError> {
        let Some(dir) = &self.font_dir else {
            return Ok(None);
        };
        let height_dir = dir.join(height.to_string());
        let name = font_file_name(ch);
        for candidate in [name.clone(), name.to_ascii_lowercase()] {
            let path = height_dir.join(candidate);
            if path.is_file() {
                return Ok(Some(image::open(&path)?.to_rgba8()));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct YamlDocumentStore {
    pub path: PathBuf,
}

impl YamlDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DocumentStore for YamlDocumentStore {
    fn save(&self, doc: &DialogueDocument) -> Result<(), WfmError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_yaml::to_string(doc)?)?;
        Ok(())
    }

    fn load(&self) -> Result<DialogueDocument, WfmError> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Builds the interchange document for a parsed file.
pub fn decode_document(
    file: &WfmFile,
    chars: &HashMap<usize, char>,
    original_size: u64,
) -> Result<DialogueDocument, WfmError> {
    let special = decode_special_dialogues(&file.header.reserved, file.header.total_dialogues)?;

    let dialogues = file
        .dialogues
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let decoded = decode_dialogue(raw, &file.glyphs, chars);
            DialogueEntry {
                id: i as u16,
                kind: decoded.kind,
                font_height: decoded.font_height,
                font_clut: decoded.font_clut,
                terminator: raw.terminator.map_or(0, Terminator::number),
                special: special.contains(&(i as u16)),
                content: decoded.content,
            }
        })
        .collect();

    Ok(DialogueDocument {
        total_dialogues: file.dialogues.len(),
        original_size,
        dialogues,
    })
}

fn check_order(doc: &DialogueDocument) -> Result<(), WfmError> {
    if doc.dialogues.len() != doc.total_dialogues {
        return Err(WfmError::DialogueCountMismatch {
            declared: doc.total_dialogues,
            found: doc.dialogues.len(),
        });
    }
    for (position, entry) in doc.dialogues.iter().enumerate() {
        if entry.id as usize != position {
            return Err(WfmError::DialogueIdOutOfOrder {
                position,
                id: entry.id,
            });
        }
    }
    Ok(())
}

/// Every (height, character) pair the document needs a glyph for, with the
/// CLUT of the first dialogue that uses it.
fn collect_glyph_keys(doc: &DialogueDocument) -> BTreeMap<(u16, char), u16> {
    let mut keys = BTreeMap::new();
    for entry in &doc.dialogues {
        for item in &entry.content {
            let Content::Text(text) = item else {
                continue;
            };
            for token in tokenize_text(text) {
                if let TextToken::Char(ch) = token {
                    keys.entry((entry.font_height, ch)).or_insert(entry.font_clut);
                }
            }
        }
    }
    keys
}

/// Rebuilds a WFM file from the interchange document, loading glyph art
/// from `store`.
pub fn build_wfm(doc: &DialogueDocument, store: &dyn GlyphStore) -> Result<WfmFile, WfmError> {
    check_order(doc)?;

    let mut glyphs = Vec::new();
    let mut glyph_ids: HashMap<(char, u16), u16> = HashMap::new();
    for ((height, ch), clut) in collect_glyph_keys(doc) {
        let Some(image) = store.font_glyph(ch, height)? else {
            warn!("font has no {}px glyph for {:?} (U+{:04X})", height, ch, ch as u32);
            continue;
        };
        let tile = Tile::from_image(&image, palette_for_height(height)).ok_or_else(|| {
            WfmError::GlyphTooLarge {
                path: font_file_name(ch),
                width: image.width(),
                height: image.height(),
            }
        })?;

        let id = GLYPH_ID_BASE as usize + glyphs.len();
        if id > GLYPH_ID_MAX as usize {
            return Err(WfmError::TooManyGlyphs {
                count: glyphs.len() + 1,
            });
        }
        glyph_ids.insert((ch, height), id as u16);
        glyphs.push(Glyph {
            clut,
            height: tile.height,
            width: tile.width,
            handakuten: 0,
            image: tile.data,
        });
    }
    info!("assigned {} glyph ids", glyphs.len());

    let mut dialogues = Vec::with_capacity(doc.dialogues.len());
    let mut special = Vec::new();
    for entry in &doc.dialogues {
        if entry.special {
            special.push(entry.id);
        }
        let terminator = match entry.terminator {
            0 => None,
            1 => Some(Terminator::Short),
            2 => Some(Terminator::Long),
            value => {
                return Err(WfmError::InvalidTerminator {
                    id: entry.id,
                    value,
                })
            }
        };
        let words = match terminator {
            Some(_) => encode_dialogue(entry.id, &entry.content, entry.font_height, &glyph_ids)?,
            None => {
                if !entry.content.is_empty() {
                    warn!("dialogue {} has a null pointer; its content is discarded", entry.id);
                }
                Vec::new()
            }
        };
        dialogues.push(RawDialogue { words, terminator });
    }

    let header = WfmHeader {
        total_dialogues: dialogues.len() as u16,
        total_glyphs: glyphs.len() as u16,
        reserved: encode_special_dialogues(&special)?,
        ..WfmHeader::default()
    };

    Ok(WfmFile {
        header,
        glyphs,
        dialogues,
    })
}

/// Largest size a WFM file can reach: two 16-bit pointer spaces plus the
/// header and tables around them.
pub const MAX_WFM_SIZE: u64 = 0x40000;

/// Pads `bytes` with 0xFF up to `original_size`. A larger file is left as
/// is; the FLA patcher absorbs the size change.
pub fn pad_to_original(bytes: &mut Vec<u8>, original_size: u64) -> Result<(), WfmError> {
    let len = bytes.len() as u64;
    if original_size > MAX_WFM_SIZE {
        return Err(WfmError::OriginalSizeTooLarge {
            requested: original_size,
            limit: MAX_WFM_SIZE,
        });
    }
    if original_size == 0 || len == original_size {
        return Ok(());
    }
    if len < original_size {
        debug!("padding WFM from {} to {} bytes", len, original_size);
        bytes.resize(original_size as usize, 0xFF);
    } else {
        warn!(
            "rebuilt WFM is {} bytes, {} more than the original",
            len,
            len - original_size
        );
    }
    Ok(())
}

/// Decode/encode driver over the glyph and document collaborators.
pub struct WfmConverter<'a> {
    glyphs: &'a dyn GlyphStore,
    documents: &'a dyn DocumentStore,
}

impl<'a> WfmConverter<'a> {
    pub fn new(glyphs: &'a dyn GlyphStore, documents: &'a dyn DocumentStore) -> Self {
        Self { glyphs, documents }
    }

    /// Decodes `raw`, exports every glyph image and saves the document.
    pub fn decode(&self, raw: &[u8]) -> Result<DialogueDocument, WfmError> {
        let file = WfmFile::parse(raw)?;
        info!(
            "WFM: {} glyphs, {} dialogues, dialogue table at {:#X}",
            file.glyphs.len(),
            file.dialogues.len(),
            file.header.dialogue_pointer_table
        );

        for (i, glyph) in file.glyphs.iter().enumerate() {
            if glyph.is_empty() {
                debug!("glyph {} is empty, not exported", i);
                continue;
            }
            self.glyphs.export_glyph(i, &glyph_image(glyph))?;
        }

        let index = FontIndex::new(&self.glyphs.font_glyphs()?);
        let chars = index.resolve(&file.glyphs);
        info!(
            "matched {} of {} glyphs against {} reference glyphs",
            chars.len(),
            file.glyphs.len(),
            index.len()
        );
        let unresolved = file
            .glyphs
            .iter()
            .enumerate()
            .filter(|(i, g)| !g.is_empty() && !chars.contains_key(i))
            .count();
        if unresolved > 0 {
            warn!(
                "{} glyphs have no reference character; dialogues using them cannot be re-encoded until the font covers them",
                unresolved
            );
        }

        let doc = decode_document(&file, &chars, raw.len() as u64)?;
        for entry in &doc.dialogues {
            debug!(
                "dialogue {}: {:?}, {}px, {} items",
                entry.id,
                entry.kind,
                entry.font_height,
                entry.content.len()
            );
        }
        self.documents.save(&doc)?;
        Ok(doc)
    }

    /// Loads the document and produces the new WFM bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WfmError> {
        let doc = self.documents.load()?;
        let file = build_wfm(&doc, self.glyphs)?;
        let mut bytes = file.to_bytes()?;
        pad_to_original(&mut bytes, doc.original_size)?;
        info!(
            "WFM rebuilt: {} glyphs, {} dialogues, {} bytes",
            file.glyphs.len(),
            file.dialogues.len(),
            bytes.len()
        );
        Ok(bytes)
    }
}
