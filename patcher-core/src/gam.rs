use log::debug;
use thiserror::Error;

pub const GAM_MAGIC: &[u8; 3] = b"GAM";
pub const GAM_HEADER_SIZE: usize = 8;

const MAX_OFFSET: usize = 0xFF;
const MAX_LENGTH: usize = 0xFF;
const MIN_MATCH: usize = 2;
const TOKENS_PER_BLOCK: usize = 16;

#[derive(Debug, Error)]
pub enum GamError {
    #[error("not a GAM file (magic {found:02X?})")]
    BadMagic { found: Vec<u8> },

    #[error("GAM file is {len} bytes, shorter than the 8-byte header")]
    TruncatedHeader { len: usize },

    #[error("back-reference at input offset {offset:#X} reaches {distance} bytes back but only {available} bytes were produced")]
    InvalidReference {
        offset: usize,
        distance: usize,
        available: usize,
    },
}

/// Decompresses a headerless GAM LZ stream into exactly `target` bytes.
///
/// Short output is zero-padded and long output is truncated; retail files
/// do not always end exactly on the declared size.
pub fn decompress(data: &[u8], target: usize) -> Result<Vec<u8>, GamError> {
    let mut out: Vec<u8> = Vec::with_capacity(target);
    let mut pos = 0usize;

    'blocks: while out.len() < target && pos + 2 <= data.len() {
        let mask = u16::from_le_bytes([data[pos], data[pos + 1]]);
        pos += 2;

        for bit in 0..TOKENS_PER_BLOCK {
            if out.len() >= target || pos >= data.len() {
                break 'blocks;
            }

            if mask & (1 << bit) != 0 {
                if pos + 1 >= data.len() {
                    break 'blocks;
                }
                let distance = data[pos] as usize;
                let length = data[pos + 1] as usize;
                if distance == 0 || distance > out.len() {
                    return Err(GamError::InvalidReference {
                        offset: pos,
                        distance,
                        available: out.len(),
                    });
                }
                pos += 2;

                let start = out.len() - distance;
                for i in 0..length {
                    let b = out[start + i];
                    out.push(b);
                }
            } else {
                out.push(data[pos]);
                pos += 1;
            }
        }
    }

    if out.len() != target {
        debug!(
            "GAM stream produced {} bytes, adjusting to declared {}",
            out.len(),
            target
        );
    }
    out.resize(target, 0);
    Ok(out)
}

fn longest_match(input: &[u8], pos: usize) -> (usize, usize) {
    let mut best_len = 0usize;
    let mut best_dist = 0usize;
    let max_dist = pos.min(MAX_OFFSET);
    let max_len = (input.len() - pos).min(MAX_LENGTH);

    for dist in 1..=max_dist {
        let mut len = 0usize;
        while len < max_len && input[pos + len] == input[pos + len - dist] {
            len += 1;
        }
        if len > best_len {
            best_len = len;
            best_dist = dist;
            if len == max_len {
                break;
            }
        }
    }

    (best_dist, best_len)
}

/// Greedy reference encoder. Not bit-exact with the game's own packer, but
/// every stream it emits is accepted by [`decompress`].
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 8 + 2);
    let mut pos = 0usize;

    while pos < input.len() {
        let mask_pos = out.len();
        out.extend_from_slice(&[0, 0]);
        let mut mask = 0u16;

        for bit in 0..TOKENS_PER_BLOCK {
            if pos >= input.len() {
                break;
            }
            let (dist, len) = longest_match(input, pos);
            if len >= MIN_MATCH {
                mask |= 1 << bit;
                out.push(dist as u8);
                out.push(len as u8);
                pos += len;
            } else {
                out.push(input[pos]);
                pos += 1;
            }
        }

        out[mask_pos..mask_pos + 2].copy_from_slice(&mask.to_le_bytes());
    }

    out
}

/// A GAM container: `"GAM"`, one reserved byte, u32 LE uncompressed size,
/// then the LZ stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamFile {
    pub reserved: u8,
    pub data: Vec<u8>,
}

impl GamFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self { reserved: 0, data }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, GamError> {
        if raw.len() < GAM_HEADER_SIZE {
            return Err(GamError::TruncatedHeader { len: raw.len() });
        }
        if &raw[0..3] != GAM_MAGIC {
            return Err(GamError::BadMagic {
                found: raw[0..3].to_vec(),
            });
        }

        let reserved = raw[3];
        let size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        let data = decompress(&raw[GAM_HEADER_SIZE..], size)?;
        Ok(Self { reserved, data })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let stream = compress(&self.data);
        let mut out = Vec::with_capacity(GAM_HEADER_SIZE + stream.len());
        out.extend_from_slice(GAM_MAGIC);
        out.push(self.reserved);
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&stream);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_literals_are_padded_to_declared_size() {
        let raw = [b'G', b'A', b'M', 0, 4, 0, 0, 0, 0x00, 0x00, 0x41, 0x42];
        let gam = GamFile::parse(&raw).unwrap();
        assert_eq!(gam.data, vec![0x41, 0x42, 0x00, 0x00]);
    }

    #[test]
    fn overlapping_reference_repeats_pattern() {
        // literal 'A', literal 'B', then copy 6 bytes from 2 back.
        let stream = [0b0000_0100, 0x00, b'A', b'B', 2, 6];
        let out = decompress(&stream, 8).unwrap();
        assert_eq!(out, b"ABABABAB");
    }

    #[test]
    fn long_output_is_truncated() {
        let stream = [0b0000_0010, 0x00, b'Z', 1, 50];
        let out = decompress(&stream, 10).unwrap();
        assert_eq!(out, vec![b'Z'; 10]);
    }

    #[test]
    fn reference_before_start_is_an_error() {
        let stream = [0b0000_0010, 0x00, b'A', 5, 3];
        let err = decompress(&stream, 4).unwrap_err();
        assert!(matches!(
            err,
            GamError::InvalidReference {
                distance: 5,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn zero_distance_is_an_error() {
        let stream = [0b0000_0010, 0x00, b'A', 0, 3];
        assert!(decompress(&stream, 4).is_err());
    }

    #[test]
    fn bad_magic_and_short_header_rejected() {
        assert!(matches!(
            GamFile::parse(b"GAX\0\0\0\0\0"),
            Err(GamError::BadMagic { .. })
        ));
        assert!(matches!(
            GamFile::parse(b"GAM"),
            Err(GamError::TruncatedHeader { len: 3 })
        ));
    }

    #[test]
    fn compress_round_trips_varied_inputs() {
        let mut noisy = Vec::new();
        let mut x: u32 = 0x1234_5678;
        for _ in 0..3000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            noisy.push((x >> 24) as u8 & 0x0F);
        }
        let samples: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![7],
            vec![0u8; 1000],
            b"the quick brown fox jumps over the quick brown dog".to_vec(),
            (0..=255u8).cycle().take(2000).collect(),
            noisy,
        ];

        for sample in samples {
            let packed = compress(&sample);
            assert_eq!(decompress(&packed, sample.len()).unwrap(), sample);
        }
    }

    #[test]
    fn runs_compress_well() {
        let data = vec![0xAAu8; 4096];
        let packed = compress(&data);
        assert!(packed.len() < 100, "packed to {} bytes", packed.len());
    }

    #[test]
    fn container_round_trip_keeps_reserved_byte() {
        let gam = GamFile {
            reserved: 0x5A,
            data: b"hello hello hello".to_vec(),
        };
        let bytes = gam.to_bytes();
        assert_eq!(&bytes[0..4], b"GAMZ");
        assert_eq!(&bytes[4..8], &17u32.to_le_bytes());
        assert_eq!(GamFile::parse(&bytes).unwrap(), gam);
    }
}
