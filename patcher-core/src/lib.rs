//! Format codecs and the disc patcher for the PSX translation toolchain.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod binary;
pub mod cd;
pub mod fla;
pub mod gam;
pub mod psx;
pub mod wfm;

use cd::{CdEntry, CdError, CdImage};
use fla::{DiscTable, FlaError, FlaOptions, PatchReport};
use gam::{GamError, GamFile};
use wfm::{DialogueDocument, PngGlyphStore, WfmConverter, WfmError, YamlDocumentStore};

#[derive(Debug, Error)]
pub enum PatcherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GAM: {0}")]
    Gam(#[from] GamError),
    #[error("WFM: {0}")]
    Wfm(#[from] WfmError),
    #[error("CD: {0}")]
    Cd(#[from] CdError),
    #[error("FLA: {0}")]
    Fla(#[from] FlaError),
}

pub type Result<T> = std::result::Result<T, PatcherError>;

/// Tool settings, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    /// Reference font tree (`<dir>/<height>/<HEX>.png`).
    pub font_dir: Option<PathBuf>,
    pub executable_path: String,
    pub fla_offset: u32,
    pub fla_scan_start: u32,
    pub shift_unlinked_entries: bool,
    pub verify_after_write: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_file: None,
            font_dir: None,
            executable_path: fla::DEFAULT_EXECUTABLE.to_string(),
            fla_offset: fla::DEFAULT_TABLE_OFFSET,
            fla_scan_start: fla::DEFAULT_SCAN_START,
            shift_unlinked_entries: false,
            verify_after_write: true,
        }
    }
}

impl ToolConfig {
    /// Reads a config file. A path that was asked for but is missing is an
    /// error, never a silent fallback to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PatcherError::Config(format!(
                "Config file does not exist: {}",
                path.display()
            )));
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn fla_options(&self, dry_run: bool) -> FlaOptions {
        FlaOptions {
            executable_path: self.executable_path.clone(),
            table_offset: self.fla_offset,
            scan_start: self.fla_scan_start,
            shift_unlinked: self.shift_unlinked_entries,
            verify: self.verify_after_write,
            dry_run,
        }
    }
}

fn require_input(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(PatcherError::Config(format!(
            "Input path does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Joins a disc path (`EXE/MAIN0.EXE`) onto a host directory, dropping
/// empty and parent components.
fn join_disc_path(base: &Path, disc_path: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in disc_path.split(['/', '\\']) {
        if !part.is_empty() && part != "." && part != ".." {
            path.push(part);
        }
    }
    path
}

pub fn decompress_gam(input: &Path, output: &Path) -> Result<usize> {
    require_input(input)?;
    let gam = GamFile::parse(&fs::read(input)?)?;
    fs::write(output, &gam.data)?;
    info!("{} -> {} ({} bytes)", input.display(), output.display(), gam.data.len());
    Ok(gam.data.len())
}

pub fn compress_gam(input: &Path, output: &Path) -> Result<usize> {
    require_input(input)?;
    let bytes = GamFile::new(fs::read(input)?).to_bytes();
    fs::write(output, &bytes)?;
    info!("{} -> {} ({} bytes)", input.display(), output.display(), bytes.len());
    Ok(bytes.len())
}

/// Writes `glyphs/glyph_NNNN.png` and `dialogues.yaml` under `out_dir`.
pub fn decode_wfm(input: &Path, out_dir: &Path, config: &ToolConfig) -> Result<DialogueDocument> {
    require_input(input)?;
    if config.font_dir.is_none() {
        warn!("no font directory configured, dialogue text will be glyph placeholders");
    }
    fs::create_dir_all(out_dir)?;

    let glyphs = PngGlyphStore::new(Some(out_dir.join("glyphs")), config.font_dir.clone());
    let documents = YamlDocumentStore::new(out_dir.join("dialogues.yaml"));
    let converter = WfmConverter::new(&glyphs, &documents);
    Ok(converter.decode(&fs::read(input)?)?)
}

pub fn encode_wfm(document: &Path, output: &Path, config: &ToolConfig) -> Result<usize> {
    require_input(document)?;
    let font_dir = config.font_dir.clone().ok_or_else(|| {
        PatcherError::Config("Encoding a WFM file needs a font directory".to_string())
    })?;

    let glyphs = PngGlyphStore::new(None, Some(font_dir));
    let documents = YamlDocumentStore::new(document);
    let converter = WfmConverter::new(&glyphs, &documents);
    let bytes = converter.encode()?;
    fs::write(output, &bytes)?;
    Ok(bytes.len())
}

pub fn list_cd(image: &Path) -> Result<Vec<CdEntry>> {
    require_input(image)?;
    let mut cd = CdImage::open(image)?;
    Ok(cd.files()?)
}

/// Extracts every file on the disc, recreating its directory tree.
pub fn extract_cd(image: &Path, out_dir: &Path) -> Result<usize> {
    require_input(image)?;
    let mut cd = CdImage::open(image)?;
    let mut count = 0;
    for entry in cd.files()? {
        let target = join_disc_path(out_dir, &entry.path);
        if entry.is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(fs::File::create(&target)?);
        cd.extract_to(&entry, &mut out)?;
        out.flush()?;
        count += 1;
    }
    info!("extracted {} files to {}", count, out_dir.display());
    Ok(count)
}

pub fn show_fla(image: &Path, config: &ToolConfig) -> Result<DiscTable> {
    require_input(image)?;
    Ok(fla::read_table_from_image(image, &config.fla_options(false))?)
}

pub fn patch_fla(original: &Path, modified: &Path, config: &ToolConfig, dry_run: bool) -> Result<PatchReport> {
    require_input(original)?;
    require_input(modified)?;
    Ok(fla::patch_image(original, modified, &config.fla_options(dry_run))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: ToolConfig = serde_json::from_str(r#"{ "verbose": true }"#).unwrap();
        assert!(config.verbose);
        assert_eq!(config.fla_offset, 0x6E6F0);
        assert_eq!(config.executable_path, "EXE/MAIN0.EXE");
        assert!(config.verify_after_write);
        assert!(!config.shift_unlinked_entries);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PatcherError::Config(_)));
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ToolConfig {
            font_dir: Some(PathBuf::from("fonts")),
            fla_offset: 0x1234,
            ..ToolConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ToolConfig::load(&path).unwrap(), config);
        let options = config.fla_options(true);
        assert_eq!(options.table_offset, 0x1234);
        assert!(options.dry_run);
    }

    #[test]
    fn disc_paths_stay_under_output() {
        let base = Path::new("out");
        assert_eq!(join_disc_path(base, "EXE/MAIN0.EXE"), base.join("EXE").join("MAIN0.EXE"));
        assert_eq!(join_disc_path(base, "../../etc"), base.join("etc"));
    }

    #[test]
    fn gam_files_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("data.raw");
        let packed = dir.path().join("data.gam");
        let unpacked = dir.path().join("data.out");
        let data: Vec<u8> = b"ABCABCABCABC hello hello hello".repeat(20);
        fs::write(&raw, &data).unwrap();
        compress_gam(&raw, &packed).unwrap();
        assert_eq!(decompress_gam(&packed, &unpacked).unwrap(), data.len());
        assert_eq!(fs::read(&unpacked).unwrap(), data);
    }

    #[test]
    fn extracts_disc_tree() {
        use cd::testdisc::{build, file};
        use cd::DiscLayout;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disc.bin");
        let exe: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        fs::write(
            &image,
            build(
                &[
                    file("", "SYSTEM.CNF", b"BOOT".to_vec()),
                    file("EXE", "MAIN0.EXE", exe.clone()),
                ],
                DiscLayout::Raw2352,
            ),
        )
        .unwrap();

        let out = dir.path().join("files");
        assert_eq!(extract_cd(&image, &out).unwrap(), 2);
        assert_eq!(fs::read(out.join("EXE").join("MAIN0.EXE")).unwrap(), exe);
        assert_eq!(fs::read(out.join("SYSTEM.CNF")).unwrap(), b"BOOT");
        assert_eq!(list_cd(&image).unwrap().len(), 3);
    }
}
