use serde::{Deserialize, Serialize};

/// The editable form of a WFM file's dialogue table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueDocument {
    pub total_dialogues: usize,
    pub original_size: u64,
    pub dialogues: Vec<DialogueEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueKind {
    #[default]
    Event,
    Dialogue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub id: u16,
    #[serde(rename = "type", default)]
    pub kind: DialogueKind,
    pub font_height: u16,
    #[serde(default)]
    pub font_clut: u16,
    /// 1 = 0xFFFE, 2 = 0xFFFF, 0 = null pointer (no stream at all).
    pub terminator: u8,
    #[serde(default)]
    pub special: bool,
    #[serde(with = "serde_yaml::with::singleton_map_recursive", default)]
    pub content: Vec<Content>,
}

/// One item of a dialogue's content list, written as a single-key map
/// (`- text: ...`, `- box: {width: 16, height: 8}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Box { width: u16, height: u16 },
    Tail { width: u16, height: u16 },
    F6 { width: u16, height: u16 },
    Color { value: u16 },
    Pause { duration: u16 },
    Fff2 { value: u16 },
}
