use log::{debug, warn};
use std::collections::HashMap;

use super::document::{Content, DialogueKind};
use super::format::{Glyph, RawDialogue};
use super::WfmError;

pub const GLYPH_ID_BASE: u16 = 0x8000;
pub const GLYPH_ID_MAX: u16 = 0xFFF1;

pub const FFF2: u16 = 0xFFF2;
pub const WAIT_FOR_INPUT: u16 = 0xFFF3;
pub const CHANGE_COLOR_TO: u16 = 0xFFF4;
pub const INIT_TAIL: u16 = 0xFFF5;
pub const F6: u16 = 0xFFF6;
pub const PAUSE_FOR: u16 = 0xFFF7;
pub const INIT_TEXT_BOX: u16 = 0xFFFA;
pub const DOUBLE_NEWLINE: u16 = 0xFFFC;
pub const NEWLINE: u16 = 0xFFFD;
pub const C04D: u16 = 0xC04D;
pub const C04E: u16 = 0xC04E;

pub const WAIT_PLACEHOLDER: char = '\u{E000}';
pub const C04D_PLACEHOLDER: char = '\u{E04D}';
pub const C04E_PLACEHOLDER: char = '\u{E04E}';

pub const DEFAULT_FONT_HEIGHT: u16 = 8;
pub const DEFAULT_FONT_CLUT: u16 = 0;

/// Control words that carry arguments or have a fixed textual rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Fff2,
    WaitForInput,
    ChangeColorTo,
    InitTail,
    F6,
    PauseFor,
    InitTextBox,
    DoubleNewline,
    Newline,
    C04d,
    C04e,
}

impl ControlCode {
    pub fn from_word(word: u16) -> Option<Self> {
        Some(match word {
            FFF2 => ControlCode::Fff2,
            WAIT_FOR_INPUT => ControlCode::WaitForInput,
            CHANGE_COLOR_TO => ControlCode::ChangeColorTo,
            INIT_TAIL => ControlCode::InitTail,
            F6 => ControlCode::F6,
            PAUSE_FOR => ControlCode::PauseFor,
            INIT_TEXT_BOX => ControlCode::InitTextBox,
            DOUBLE_NEWLINE => ControlCode::DoubleNewline,
            NEWLINE => ControlCode::Newline,
            C04D => ControlCode::C04d,
            C04E => ControlCode::C04e,
            _ => return None,
        })
    }

    pub fn arg_count(self) -> usize {
        match self {
            ControlCode::InitTextBox | ControlCode::InitTail | ControlCode::F6 => 2,
            ControlCode::ChangeColorTo | ControlCode::PauseFor | ControlCode::Fff2 => 1,
            _ => 0,
        }
    }
}

/// Number of argument words that follow `word` in a dialogue stream.
pub fn arg_count(word: u16) -> usize {
    ControlCode::from_word(word).map_or(0, ControlCode::arg_count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDialogue {
    pub kind: DialogueKind,
    pub font_height: u16,
    pub font_clut: u16,
    pub content: Vec<Content>,
}

fn flush_text(text: &mut String, content: &mut Vec<Content>) {
    if !text.is_empty() {
        content.push(Content::Text(std::mem::take(text)));
    }
}

/// Turns a raw word stream into structured content. `chars` maps glyph
/// table indices to the characters they were matched against.
pub fn decode_dialogue(
    raw: &RawDialogue,
    glyphs: &[Glyph],
    chars: &HashMap<usize, char>,
) -> DecodedDialogue {
    let mut kind = DialogueKind::Event;
    let mut font: Option<(u16, u16)> = None;
    let mut content = Vec::new();
    let mut text = String::new();

    let words = &raw.words;
    let arg = |i: usize| words.get(i).copied().unwrap_or(0);
    let mut i = 0usize;
    while i < words.len() {
        let word = words[i];
        i += 1;

        match ControlCode::from_word(word) {
            Some(code @ (ControlCode::InitTextBox | ControlCode::InitTail | ControlCode::F6)) => {
                flush_text(&mut text, &mut content);
                let (width, height) = (arg(i), arg(i + 1));
                content.push(match code {
                    ControlCode::InitTextBox => {
                        kind = DialogueKind::Dialogue;
                        Content::Box { width, height }
                    }
                    ControlCode::InitTail => Content::Tail { width, height },
                    _ => Content::F6 { width, height },
                });
                i += 2;
            }
            Some(ControlCode::ChangeColorTo) => {
                flush_text(&mut text, &mut content);
                content.push(Content::Color { value: arg(i) });
                i += 1;
            }
            Some(ControlCode::PauseFor) => {
                flush_text(&mut text, &mut content);
                content.push(Content::Pause { duration: arg(i) });
                i += 1;
            }
            Some(ControlCode::Fff2) => {
                flush_text(&mut text, &mut content);
                content.push(Content::Fff2 { value: arg(i) });
                i += 1;
            }
            Some(ControlCode::Newline) => text.push('\n'),
            Some(ControlCode::DoubleNewline) => text.push_str("\n\n"),
            Some(ControlCode::WaitForInput) => text.push(WAIT_PLACEHOLDER),
            Some(ControlCode::C04d) => text.push(C04D_PLACEHOLDER),
            Some(ControlCode::C04e) => text.push(C04E_PLACEHOLDER),
            None if (GLYPH_ID_BASE..=GLYPH_ID_MAX).contains(&word) => {
                let index = (word - GLYPH_ID_BASE) as usize;
                match chars.get(&index) {
                    Some(&ch) => {
                        if font.is_none() {
                            if let Some(glyph) = glyphs.get(index) {
                                font = Some((glyph.height, glyph.clut));
                            }
                        }
                        text.push(ch);
                    }
                    None => {
                        debug!("glyph id {:#06X} has no matching character", word);
                        text.push_str(&format!("[{:04X}]", word));
                    }
                }
            }
            None => text.push_str(&format!("[{:04X}]", word)),
        }
    }
    flush_text(&mut text, &mut content);

    let (font_height, font_clut) = font.unwrap_or((DEFAULT_FONT_HEIGHT, DEFAULT_FONT_CLUT));
    DecodedDialogue {
        kind,
        font_height,
        font_clut,
        content,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextToken {
    Char(char),
    Newline,
    DoubleNewline,
    Raw(u16),
}

fn parse_raw_word(chars: &[char]) -> Option<u16> {
    if chars.len() < 6 || chars[0] != '[' || chars[5] != ']' {
        return None;
    }
    let hex: String = chars[1..5].iter().collect();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(&hex, 16).ok()
}

/// Splits a text run into glyph characters and control words, collapsing
/// `"\n\n"` into a single DOUBLE_NEWLINE the way the decoder expands it.
pub fn tokenize_text(text: &str) -> Vec<TextToken> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\n' {
            if chars.get(i + 1) == Some(&'\n') {
                tokens.push(TextToken::DoubleNewline);
                i += 2;
            } else {
                tokens.push(TextToken::Newline);
                i += 1;
            }
            continue;
        }
        if ch == '[' {
            if let Some(word) = parse_raw_word(&chars[i..]) {
                tokens.push(TextToken::Raw(word));
                i += 6;
                continue;
            }
        }
        tokens.push(match ch {
            WAIT_PLACEHOLDER => TextToken::Raw(WAIT_FOR_INPUT),
            C04D_PLACEHOLDER => TextToken::Raw(C04D),
            C04E_PLACEHOLDER => TextToken::Raw(C04E),
            _ => TextToken::Char(ch),
        });
        i += 1;
    }
    tokens
}

/// Renders structured content back into dialogue words (terminator not
/// included). Characters missing from `glyph_ids` are logged and dropped.
///
/// A literal `[XXXX]` in the glyph id range is an error: glyph ids are
/// reassigned on every rebuild, so the old id would point at another glyph.
pub fn encode_dialogue(
    dialogue: u16,
    content: &[Content],
    font_height: u16,
    glyph_ids: &HashMap<(char, u16), u16>,
) -> Result<Vec<u16>, WfmError> {
    let mut words = Vec::new();
    for item in content {
        match item {
            Content::Text(text) => {
                for token in tokenize_text(text) {
                    match token {
                        TextToken::Newline => words.push(NEWLINE),
                        TextToken::DoubleNewline => words.push(DOUBLE_NEWLINE),
                        TextToken::Raw(word) if (GLYPH_ID_BASE..=GLYPH_ID_MAX).contains(&word) => {
                            return Err(WfmError::UnresolvedGlyph { dialogue, word });
                        }
                        TextToken::Raw(word) => words.push(word),
                        TextToken::Char(ch) => match glyph_ids.get(&(ch, font_height)) {
                            Some(&id) => words.push(id),
                            None => warn!(
                                "no glyph for {:?} (U+{:04X}) at height {}, dropping it",
                                ch, ch as u32, font_height
                            ),
                        },
                    }
                }
            }
            Content::Box { width, height } => words.extend([INIT_TEXT_BOX, *width, *height]),
            Content::Tail { width, height } => words.extend([INIT_TAIL, *width, *height]),
            Content::F6 { width, height } => words.extend([F6, *width, *height]),
            Content::Color { value } => words.extend([CHANGE_COLOR_TO, *value]),
            Content::Pause { duration } => words.extend([PAUSE_FOR, *duration]),
            Content::Fff2 { value } => words.extend([FFF2, *value]),
        }
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfm::format::Terminator;

    fn raw(words: &[u16]) -> RawDialogue {
        RawDialogue {
            words: words.to_vec(),
            terminator: Some(Terminator::Long),
        }
    }

    fn glyph(height: u16, clut: u16) -> Glyph {
        Glyph {
            clut,
            height,
            width: 8,
            handakuten: 0,
            image: vec![0; (8 * height as usize + 1) / 2],
        }
    }

    #[test]
    fn box_only_dialogue() {
        let decoded = decode_dialogue(
            &raw(&[INIT_TEXT_BOX, 0x10, 0x08]),
            &[glyph(8, 0)],
            &HashMap::new(),
        );
        assert_eq!(decoded.kind, DialogueKind::Dialogue);
        assert_eq!(
            decoded.content,
            vec![Content::Box {
                width: 16,
                height: 8
            }]
        );
        assert_eq!((decoded.font_height, decoded.font_clut), (8, 0));
    }

    #[test]
    fn text_and_controls_decode_in_order() {
        let glyphs = vec![glyph(16, 2), glyph(16, 2)];
        let chars = HashMap::from([(0usize, 'H'), (1usize, 'i')]);
        let decoded = decode_dialogue(
            &raw(&[
                0x8000,
                0x8001,
                NEWLINE,
                0x8001,
                CHANGE_COLOR_TO,
                3,
                WAIT_FOR_INPUT,
                0x8005,
                DOUBLE_NEWLINE,
                C04D,
                PAUSE_FOR,
                30,
                0xFFF8,
            ]),
            &glyphs,
            &chars,
        );
        assert_eq!(decoded.kind, DialogueKind::Event);
        assert_eq!((decoded.font_height, decoded.font_clut), (16, 2));
        assert_eq!(
            decoded.content,
            vec![
                Content::Text("Hi\ni".to_string()),
                Content::Color { value: 3 },
                Content::Text("\u{E000}[8005]\n\n\u{E04D}".to_string()),
                Content::Pause { duration: 30 },
                Content::Text("[FFF8]".to_string()),
            ]
        );
    }

    #[test]
    fn unresolved_glyphs_fall_back_to_default_font() {
        let decoded = decode_dialogue(&raw(&[0x8000]), &[glyph(24, 5)], &HashMap::new());
        assert_eq!((decoded.font_height, decoded.font_clut), (8, 0));
        assert_eq!(decoded.content, vec![Content::Text("[8000]".to_string())]);
    }

    #[test]
    fn tokenizer_handles_newlines_and_raw_words() {
        assert_eq!(
            tokenize_text("a\n\n\nb[C04E][zz]"),
            vec![
                TextToken::Char('a'),
                TextToken::DoubleNewline,
                TextToken::Newline,
                TextToken::Char('b'),
                TextToken::Raw(0xC04E),
                TextToken::Char('['),
                TextToken::Char('z'),
                TextToken::Char('z'),
                TextToken::Char(']'),
            ]
        );
    }

    #[test]
    fn encode_reverses_decode() {
        let words = vec![
            INIT_TEXT_BOX,
            0x20,
            0x10,
            0x8000,
            NEWLINE,
            0x8001,
            INIT_TAIL,
            4,
            5,
            F6,
            1,
            2,
            FFF2,
            9,
            WAIT_FOR_INPUT,
            0xFFF9,
        ];
        let glyphs = vec![glyph(8, 0), glyph(8, 0)];
        let chars = HashMap::from([(0usize, 'A'), (1usize, 'B')]);
        let decoded = decode_dialogue(&raw(&words), &glyphs, &chars);

        let ids = HashMap::from([(('A', 8u16), 0x8000u16), (('B', 8u16), 0x8001u16)]);
        assert_eq!(encode_dialogue(0, &decoded.content, 8, &ids).unwrap(), words);
    }

    #[test]
    fn unresolved_glyph_word_cannot_be_encoded() {
        let glyphs = vec![glyph(8, 0), glyph(8, 0)];
        let chars = HashMap::from([(0usize, 'A')]);
        let decoded = decode_dialogue(&raw(&[0x8001, 0x8000]), &glyphs, &chars);
        assert_eq!(decoded.content, vec![Content::Text("[8001]A".to_string())]);

        let ids = HashMap::from([(('A', 8u16), 0x8000u16)]);
        let err = encode_dialogue(7, &decoded.content, 8, &ids).unwrap_err();
        assert!(matches!(
            err,
            WfmError::UnresolvedGlyph {
                dialogue: 7,
                word: 0x8001
            }
        ));
    }

    #[test]
    fn missing_glyph_is_dropped() {
        let ids = HashMap::from([(('A', 8u16), 0x8000u16)]);
        let words = encode_dialogue(0, &[Content::Text("AxA".to_string())], 8, &ids).unwrap();
        assert_eq!(words, vec![0x8000, 0x8000]);
    }

    #[test]
    fn argument_counts() {
        assert_eq!(arg_count(INIT_TEXT_BOX), 2);
        assert_eq!(arg_count(PAUSE_FOR), 1);
        assert_eq!(arg_count(NEWLINE), 0);
        assert_eq!(arg_count(0x8000), 0);
    }
}
