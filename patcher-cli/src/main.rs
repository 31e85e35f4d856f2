use clap::{Args as ClapArgs, Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};

use patcher_core::{
    compress_gam, decode_wfm, decompress_gam, encode_wfm, extract_cd, list_cd, patch_fla, show_fla,
    PatcherError, ToolConfig,
};

#[derive(Debug, Parser)]
#[command(name = "psx-patcher", version, about = "PSX font, archive and disc patching tool")]
struct Args {
    /// JSON settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// GAM LZ containers.
    #[command(subcommand)]
    Gam(GamCommand),
    /// WFM font/dialogue files.
    #[command(subcommand)]
    Wfm(WfmCommand),
    /// ISO 9660 disc images.
    #[command(subcommand)]
    Cd(CdCommand),
    /// The executable's file link address table.
    #[command(subcommand)]
    Fla(FlaCommand),
}

#[derive(Debug, Subcommand)]
enum GamCommand {
    Decompress { input: PathBuf, output: PathBuf },
    Compress { input: PathBuf, output: PathBuf },
}

#[derive(Debug, ClapArgs)]
struct FontArgs {
    /// Reference font tree, `<dir>/<height>/<HEX>.png`.
    #[arg(long)]
    font_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum WfmCommand {
    /// Export glyph PNGs and dialogues.yaml.
    Decode {
        input: PathBuf,
        out_dir: PathBuf,
        #[command(flatten)]
        font: FontArgs,
    },
    /// Rebuild a WFM file from dialogues.yaml.
    Encode {
        document: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        font: FontArgs,
    },
}

#[derive(Debug, Subcommand)]
enum CdCommand {
    List { image: PathBuf },
    Extract { image: PathBuf, out_dir: PathBuf },
}

#[derive(Debug, Subcommand)]
enum FlaCommand {
    Show {
        image: PathBuf,
    },
    Patch {
        #[arg(long)]
        original: PathBuf,
        #[arg(long)]
        modified: PathBuf,
        /// Report the differences without touching the image.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn setup_logging(config: &ToolConfig) -> Result<(), fern::InitError> {
    let level = if config.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = &config.log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    dispatch.apply()?;
    Ok(())
}

fn load_config(args: &Args) -> Result<ToolConfig, PatcherError> {
    let mut config = match &args.config {
        Some(path) => ToolConfig::load(path)?,
        None => ToolConfig::default(),
    };
    if args.verbose {
        config.verbose = true;
    }
    Ok(config)
}

fn with_font_dir(config: &ToolConfig, font: &FontArgs) -> ToolConfig {
    let mut config = config.clone();
    if let Some(dir) = &font.font_dir {
        config.font_dir = Some(dir.clone());
    }
    config
}

fn print_fla(image: &Path, config: &ToolConfig) -> Result<(), PatcherError> {
    let disc = show_fla(image, config)?;
    let links = disc.table.link(&disc.files);
    println!(
        "{} entries at {}+{:#X} ({:?})",
        disc.table.len(),
        disc.executable.path,
        disc.table.offset,
        disc.layout
    );
    for (i, (entry, file)) in disc.table.entries.iter().zip(links).enumerate() {
        println!(
            "{:4}  {}  {:>10}  {}",
            i,
            entry.timecode,
            entry.file_size,
            file.map_or("-", |f| f.path.as_str())
        );
    }
    Ok(())
}

fn run(args: Args, config: ToolConfig) -> Result<(), PatcherError> {
    match args.command {
        Command::Gam(GamCommand::Decompress { input, output }) => {
            decompress_gam(&input, &output)?;
        }
        Command::Gam(GamCommand::Compress { input, output }) => {
            compress_gam(&input, &output)?;
        }
        Command::Wfm(WfmCommand::Decode {
            input,
            out_dir,
            font,
        }) => {
            let doc = decode_wfm(&input, &out_dir, &with_font_dir(&config, &font))?;
            println!("{} dialogues written to {}", doc.dialogues.len(), out_dir.display());
        }
        Command::Wfm(WfmCommand::Encode {
            document,
            output,
            font,
        }) => {
            let size = encode_wfm(&document, &output, &with_font_dir(&config, &font))?;
            println!("{} ({} bytes)", output.display(), size);
        }
        Command::Cd(CdCommand::List { image }) => {
            for entry in list_cd(&image)? {
                let kind = if entry.is_dir { "<DIR>" } else { "" };
                println!(
                    "{}  {:>8}  {:>10}  {:5}  {}",
                    entry.msf, entry.lba, entry.size, kind, entry.path
                );
            }
        }
        Command::Cd(CdCommand::Extract { image, out_dir }) => {
            let count = extract_cd(&image, &out_dir)?;
            println!("{} files extracted to {}", count, out_dir.display());
        }
        Command::Fla(FlaCommand::Show { image }) => print_fla(&image, &config)?,
        Command::Fla(FlaCommand::Patch {
            original,
            modified,
            dry_run,
        }) => {
            let report = patch_fla(&original, &modified, &config, dry_run)?;
            for diff in &report.differences {
                println!("entry {:4}: {}", diff.entry_index, diff.description);
            }
            match report.written_at {
                Some(offset) => println!("FLA table written at {:#X}", offset),
                None if report.differences.is_empty() => println!("No changes"),
                None => println!("Dry run, image not modified"),
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = setup_logging(&config) {
        eprintln!("Failed to set up logging: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(args, config) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
