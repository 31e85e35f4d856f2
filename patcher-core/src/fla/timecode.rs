use crate::cd::SECTORS_PER_SECOND;

const MAX_MINUTES: u32 = 99;

fn bcd_decode(byte: u8) -> Option<u8> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        return None;
    }
    Some(hi * 10 + lo)
}

fn bcd_encode(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// A CD position as stored in the executable: four BCD bytes, minutes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timecode {
    pub minutes: u8,
    pub seconds: u8,
    pub sectors: u8,
    pub unused: u8,
}

impl Timecode {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            minutes: bytes[0],
            seconds: bytes[1],
            sectors: bytes[2],
            unused: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.minutes, self.seconds, self.sectors, self.unused]
    }

    /// Decimal (minutes, seconds, sectors) when every field is valid BCD in range.
    pub fn decoded(&self) -> Option<(u8, u8, u8)> {
        let m = bcd_decode(self.minutes)?;
        let s = bcd_decode(self.seconds)?;
        let f = bcd_decode(self.sectors)?;
        if s > 59 || f as u32 >= SECTORS_PER_SECOND {
            return None;
        }
        Some((m, s, f))
    }

    pub fn is_plausible(&self) -> bool {
        self.decoded().is_some()
    }

    /// Sectors since 00:00:00, pregap included.
    pub fn to_absolute_sector(&self) -> Option<u32> {
        let (m, s, f) = self.decoded()?;
        Some((m as u32 * 60 + s as u32) * SECTORS_PER_SECOND + f as u32)
    }

    pub fn from_absolute_sector(sector: u32, unused: u8) -> Option<Self> {
        let minutes = sector / (SECTORS_PER_SECOND * 60);
        if minutes > MAX_MINUTES {
            return None;
        }
        let seconds = (sector / SECTORS_PER_SECOND) % 60;
        let frames = sector % SECTORS_PER_SECOND;
        Some(Self {
            minutes: bcd_encode(minutes as u8),
            seconds: bcd_encode(seconds as u8),
            sectors: bcd_encode(frames as u8),
            unused,
        })
    }

    /// Moves the timecode by `delta` sectors. `None` if the result leaves
    /// the representable range or the timecode is not valid BCD.
    pub fn shifted(&self, delta: i64) -> Option<Self> {
        let abs = self.to_absolute_sector()? as i64 + delta;
        let abs = u32::try_from(abs).ok()?;
        Self::from_absolute_sector(abs, self.unused)
    }

    /// `MM:SS:FF` in decimal, comparable with `CdEntry::msf`.
    pub fn to_msf_string(&self) -> String {
        match self.decoded() {
            Some((m, s, f)) => format!("{:02}:{:02}:{:02}", m, s, f),
            None => format!(
                "{:02X}:{:02X}:{:02X}",
                self.minutes, self.seconds, self.sectors
            ),
        }
    }
}

impl std::fmt::Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_msf_string())
    }
}
