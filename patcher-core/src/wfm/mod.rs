//! WFM3 font/dialogue containers.
//!
//! [`format`] handles the byte layout, [`dialogue`] the control-code word
//! stream, [`font`] glyph fingerprinting against a reference font, and
//! [`convert`] ties them together with the PNG and YAML collaborators.

use thiserror::Error;

pub mod convert;
pub mod dialogue;
pub mod document;
pub mod font;
pub mod format;

pub use convert::{DocumentStore, GlyphStore, PngGlyphStore, WfmConverter, YamlDocumentStore};
pub use dialogue::ControlCode;
pub use document::{Content, DialogueDocument, DialogueEntry, DialogueKind};
pub use format::{Glyph, RawDialogue, Terminator, WfmFile, WfmHeader};

#[derive(Debug, Error)]
pub enum WfmError {
    #[error("not a WFM3 file (magic {found:02X?})")]
    BadMagic { found: [u8; 4] },

    #[error("{what} truncated at offset {offset:#X}")]
    Truncated {
        what: &'static str,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("dialogue {index} at offset {offset:#X} has no terminator before end of file")]
    UnterminatedDialogue { index: usize, offset: u64 },

    #[error("{what} at offset {offset:#X} does not fit a 16-bit pointer")]
    PointerOverflow { what: &'static str, offset: usize },

    #[error("{count} special dialogues exceed the 64 reserved slots")]
    TooManySpecialDialogues { count: usize },

    #[error("reserved section is {len} bytes, expected 128")]
    ReservedSectionLength { len: usize },

    #[error("document lists {found} dialogues but declares total_dialogues {declared}")]
    DialogueCountMismatch { declared: usize, found: usize },

    #[error("dialogue at position {position} has id {id}; ids must run 0..total_dialogues")]
    DialogueIdOutOfOrder { position: usize, id: u16 },

    #[error("dialogue {id} has terminator {value}; expected 0, 1 or 2")]
    InvalidTerminator { id: u16, value: u8 },

    #[error("{count} distinct glyphs exceed the glyph id space")]
    TooManyGlyphs { count: usize },

    #[error("glyph image {path} is {width}x{height}, too large for a WFM glyph")]
    GlyphTooLarge {
        path: String,
        width: u32,
        height: u32,
    },

    #[error("dialogue {dialogue} refers to glyph {word:#06X}, which has no character to rebuild it from")]
    UnresolvedGlyph { dialogue: u16, word: u16 },

    #[error("original_size {requested} is implausible for a WFM file (limit {limit} bytes)")]
    OriginalSizeTooLarge { requested: u64, limit: u64 },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
