use image::{Rgba, RgbaImage};

/// A 15-bit PSX colour: red in bits 0-4, green in 5-9, blue in 10-14.
///
/// The value 0 is the hardware's "transparent" colour. Opaque black is
/// stored with the STP bit (0x8000) so it survives a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PsxColor(pub u16);

const OPAQUE_BLACK: u16 = 0x8000;

impl PsxColor {
    pub const TRANSPARENT: PsxColor = PsxColor(0);

    pub const fn from_rgb5(r: u16, g: u16, b: u16) -> Self {
        PsxColor((r & 0x1F) | ((g & 0x1F) << 5) | ((b & 0x1F) << 10))
    }

    pub fn red(self) -> u8 {
        ((self.0 & 0x1F) << 3) as u8
    }

    pub fn green(self) -> u8 {
        (((self.0 >> 5) & 0x1F) << 3) as u8
    }

    pub fn blue(self) -> u8 {
        (((self.0 >> 10) & 0x1F) << 3) as u8
    }

    pub fn is_transparent(self) -> bool {
        self.0 == 0
    }

    pub fn to_rgba(self) -> [u8; 4] {
        if self.is_transparent() {
            return [0, 0, 0, 0];
        }
        [self.red(), self.green(), self.blue(), 0xFF]
    }

    pub fn from_rgba(rgba: [u8; 4]) -> Self {
        let [r, g, b, a] = rgba;
        if a == 0 {
            return PsxColor::TRANSPARENT;
        }
        let value = (r as u16 >> 3) | ((g as u16 >> 3) << 5) | ((b as u16 >> 3) << 10);
        if value == 0 {
            PsxColor(OPAQUE_BLACK)
        } else {
            PsxColor(value)
        }
    }
}

pub type Palette = [PsxColor; 16];

/// Standard dialogue text: transparent, shadow, then a light ramp.
pub const DIALOGUE_PALETTE: Palette = [
    PsxColor::TRANSPARENT,
    PsxColor::from_rgb5(2, 2, 2),
    PsxColor::from_rgb5(6, 6, 6),
    PsxColor::from_rgb5(10, 10, 10),
    PsxColor::from_rgb5(14, 14, 14),
    PsxColor::from_rgb5(18, 18, 18),
    PsxColor::from_rgb5(22, 22, 22),
    PsxColor::from_rgb5(25, 25, 25),
    PsxColor::from_rgb5(28, 28, 28),
    PsxColor::from_rgb5(31, 31, 31),
    PsxColor::from_rgb5(31, 8, 8),
    PsxColor::from_rgb5(8, 31, 8),
    PsxColor::from_rgb5(8, 8, 31),
    PsxColor::from_rgb5(31, 31, 8),
    PsxColor::from_rgb5(8, 31, 31),
    PsxColor::from_rgb5(31, 8, 31),
];

/// Large 24px event/emphasis text.
pub const EVENT_PALETTE: Palette = [
    PsxColor::TRANSPARENT,
    PsxColor::from_rgb5(3, 1, 0),
    PsxColor::from_rgb5(7, 4, 1),
    PsxColor::from_rgb5(11, 7, 2),
    PsxColor::from_rgb5(15, 10, 3),
    PsxColor::from_rgb5(19, 14, 4),
    PsxColor::from_rgb5(23, 18, 6),
    PsxColor::from_rgb5(26, 21, 8),
    PsxColor::from_rgb5(28, 24, 11),
    PsxColor::from_rgb5(30, 27, 15),
    PsxColor::from_rgb5(31, 29, 20),
    PsxColor::from_rgb5(31, 31, 26),
    PsxColor::from_rgb5(31, 31, 31),
    PsxColor::from_rgb5(20, 0, 0),
    PsxColor::from_rgb5(0, 12, 20),
    PsxColor::from_rgb5(1, 1, 1),
];

pub const EVENT_FONT_HEIGHT: u16 = 24;

pub fn palette_for_height(height: u16) -> &'static Palette {
    if height == EVENT_FONT_HEIGHT {
        &EVENT_PALETTE
    } else {
        &DIALOGUE_PALETTE
    }
}

/// Index of the opaque palette entry closest to `rgba` (squared RGB distance).
/// Fully transparent pixels always map to index 0.
pub fn nearest_index(palette: &Palette, rgba: [u8; 4]) -> u8 {
    if rgba[3] == 0 {
        return 0;
    }

    let mut best = 1u8;
    let mut best_dist = u32::MAX;
    for (i, color) in palette.iter().enumerate().skip(1) {
        let [r, g, b, _] = color.to_rgba();
        let dr = r as i32 - rgba[0] as i32;
        let dg = g as i32 - rgba[1] as i32;
        let db = b as i32 - rgba[2] as i32;
        let dist = (dr * dr + dg * dg + db * db) as u32;
        if dist < best_dist {
            best_dist = dist;
            best = i as u8;
        }
    }
    best
}

/// 4bpp indexed pixels, two per byte, even pixel in the low nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl Tile {
    pub fn byte_len(width: u16, height: u16) -> usize {
        (width as usize * height as usize + 1) / 2
    }

    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; Self::byte_len(width, height)],
        }
    }

    /// Wraps existing pixel bytes, padding or truncating to the exact size.
    pub fn from_data(width: u16, height: u16, mut data: Vec<u8>) -> Self {
        data.resize(Self::byte_len(width, height), 0);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn pixel(&self, x: u16, y: u16) -> u8 {
        let idx = y as usize * self.width as usize + x as usize;
        let byte = self.data[idx / 2];
        if idx % 2 == 0 {
            byte & 0x0F
        } else {
            byte >> 4
        }
    }

    pub fn set_pixel(&mut self, x: u16, y: u16, value: u8) {
        let idx = y as usize * self.width as usize + x as usize;
        let byte = &mut self.data[idx / 2];
        if idx % 2 == 0 {
            *byte = (*byte & 0xF0) | (value & 0x0F);
        } else {
            *byte = (*byte & 0x0F) | ((value & 0x0F) << 4);
        }
    }

    pub fn to_image(&self, palette: &Palette) -> RgbaImage {
        let mut img = RgbaImage::new(self.width as u32, self.height as u32);
        for y in 0..self.height {
            for x in 0..self.width {
                let color = palette[self.pixel(x, y) as usize];
                img.put_pixel(x as u32, y as u32, Rgba(color.to_rgba()));
            }
        }
        img
    }

    /// Returns `None` when the image is too large for a u16 tile.
    pub fn from_image(img: &RgbaImage, palette: &Palette) -> Option<Self> {
        let width = u16::try_from(img.width()).ok()?;
        let height = u16::try_from(img.height()).ok()?;
        let mut tile = Tile::new(width, height);
        for (x, y, px) in img.enumerate_pixels() {
            tile.set_pixel(x as u16, y as u16, nearest_index(palette, px.0));
        }
        Some(tile)
    }
}
