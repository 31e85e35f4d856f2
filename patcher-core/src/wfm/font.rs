use image::RgbaImage;
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::format::Glyph;
use crate::psx::palette_for_height;

pub type Fingerprint = [u8; 32];

/// A glyph from the reference font tree.
#[derive(Debug, Clone)]
pub struct FontGlyph {
    pub ch: char,
    pub height: u16,
    pub image: RgbaImage,
}

/// Characters whose font file lives under a different codepoint.
const FILE_REMAPS: [(char, char); 2] = [('\u{3000}', ' '), ('\u{301C}', '\u{FF5E}')];

/// The codepoint used to name the font file for `ch`.
pub fn font_file_char(ch: char) -> char {
    FILE_REMAPS
        .iter()
        .find(|(from, _)| *from == ch)
        .map_or(ch, |(_, to)| *to)
}

pub fn font_file_name(ch: char) -> String {
    format!("{:04X}.png", font_file_char(ch) as u32)
}

/// SHA-256 over the dimensions and raw RGBA pixels.
pub fn fingerprint(image: &RgbaImage) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((image.width() as u16).to_le_bytes());
    hasher.update((image.height() as u16).to_le_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().into()
}

/// Renders a glyph with the palette its height selects.
pub fn glyph_image(glyph: &Glyph) -> RgbaImage {
    glyph.tile().to_image(palette_for_height(glyph.height))
}

#[derive(Debug, Default)]
pub struct FontIndex {
    by_fingerprint: HashMap<Fingerprint, char>,
}

impl FontIndex {
    pub fn new(glyphs: &[FontGlyph]) -> Self {
        let mut by_fingerprint = HashMap::with_capacity(glyphs.len());
        for glyph in glyphs {
            by_fingerprint
                .entry(fingerprint(&glyph.image))
                .or_insert(glyph.ch);
        }
        Self { by_fingerprint }
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    pub fn lookup(&self, image: &RgbaImage) -> Option<char> {
        self.by_fingerprint.get(&fingerprint(image)).copied()
    }

    /// Maps glyph table indices to characters by pixel-exact match.
    pub fn resolve(&self, glyphs: &[Glyph]) -> HashMap<usize, char> {
        let mut chars = HashMap::new();
        for (i, glyph) in glyphs.iter().enumerate() {
            if glyph.is_empty() {
                continue;
            }
            match self.lookup(&glyph_image(glyph)) {
                Some(ch) => {
                    chars.insert(i, ch);
                }
                None => debug!("glyph {} ({}x{}) not in reference font", i, glyph.width, glyph.height),
            }
        }
        chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psx::{Tile, DIALOGUE_PALETTE};

    fn glyph_from(tile: &Tile) -> Glyph {
        Glyph {
            clut: 0,
            height: tile.height,
            width: tile.width,
            handakuten: 0,
            image: tile.data.clone(),
        }
    }

    #[test]
    fn remapped_characters_use_other_files() {
        assert_eq!(font_file_name('A'), "0041.png");
        assert_eq!(font_file_name('\u{3000}'), "0020.png");
        assert_eq!(font_file_name('\u{301C}'), "FF5E.png");
        assert_eq!(font_file_name('あ'), "3042.png");
    }

    #[test]
    fn resolves_exact_pixel_matches_only() {
        let mut a = Tile::new(4, 8);
        a.set_pixel(1, 1, 9);
        let mut b = Tile::new(4, 8);
        b.set_pixel(2, 2, 9);
        let mut unknown = Tile::new(4, 8);
        unknown.set_pixel(3, 3, 9);

        let index = FontIndex::new(&[
            FontGlyph {
                ch: 'a',
                height: 8,
                image: a.to_image(&DIALOGUE_PALETTE),
            },
            FontGlyph {
                ch: 'b',
                height: 8,
                image: b.to_image(&DIALOGUE_PALETTE),
            },
        ]);
        assert_eq!(index.len(), 2);

        let glyphs = vec![glyph_from(&b), Glyph::default(), glyph_from(&unknown), glyph_from(&a)];
        let chars = index.resolve(&glyphs);
        assert_eq!(chars.get(&0), Some(&'b'));
        assert_eq!(chars.get(&1), None);
        assert_eq!(chars.get(&2), None);
        assert_eq!(chars.get(&3), Some(&'a'));
    }

    #[test]
    fn fingerprint_includes_dimensions() {
        let wide = Tile::new(4, 2).to_image(&DIALOGUE_PALETTE);
        let tall = Tile::new(2, 4).to_image(&DIALOGUE_PALETTE);
        assert_ne!(fingerprint(&wide), fingerprint(&tall));
    }
}
