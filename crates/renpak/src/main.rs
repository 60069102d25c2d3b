mod config;

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser as ClapParser, Subcommand};
use renpak_core::decompile::{decompile_script, DecompileOptions};
use renpak_core::format::archive::open_archive;
use renpak_core::format::script::load_script;

use crate::config::app_config::AppConfig;

#[derive(ClapParser, Debug)]
#[command(version, about = "Ren'Py archive extractor and script decompiler")]
struct Args {
    /// TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists every file in an archive.
    List { archive: PathBuf },

    /// Extracts an archive into a directory.
    Extract {
        archive: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Also write a decompiled `.rpy` next to every `.rpyc`.
        #[arg(short, long)]
        decompile: bool,

        #[command(flatten)]
        style: StyleArgs,
    },

    /// Decompiles one compiled script.
    Decompile {
        input: PathBuf,

        /// Defaults to the input path with an `.rpy` extension.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source script to check the embedded digest against.
        #[arg(long)]
        source: Option<PathBuf>,

        #[command(flatten)]
        style: StyleArgs,
    },
}

#[derive(clap::Args, Debug)]
struct StyleArgs {
    /// Keep the output exactly as rendered.
    #[arg(long)]
    raw: bool,

    /// Leave the decompilation date out of the preamble.
    #[arg(long)]
    no_date: bool,
}

impl StyleArgs {
    fn apply(&self, base: &DecompileOptions) -> DecompileOptions {
        let mut options = base.clone();
        if self.raw {
            options.clean_output = false;
        }
        options.decompiled_at = if self.no_date {
            None
        } else {
            base.decompiled_at.or_else(|| Some(Utc::now()))
        };
        options
    }
}

fn list(archive: &Path) -> Result<()> {
    let root = open_archive(archive).with_context(|| format!("opening {}", archive.display()))?;
    for (path, file) in root.files() {
        println!("{:>12}  {}", file.len(), path);
    }
    Ok(())
}

fn decompile_bytes(data: Vec<u8>, options: &DecompileOptions) -> Result<String> {
    let container = load_script(data)?;
    Ok(decompile_script(&container, options)?)
}

/// Joins an archive path onto `output`, refusing anything that would land outside it.
fn extract_target(output: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("refusing to extract {path:?} outside {}", output.display());
    }
    Ok(output.join(relative))
}

fn extract(archive: &Path, output: &Path, decompile: bool, options: &DecompileOptions) -> Result<()> {
    let root = open_archive(archive).with_context(|| format!("opening {}", archive.display()))?;
    let files = root.files();
    log::info!("extracting {} files to {}", files.len(), output.display());

    for (path, file) in files {
        let target = extract_target(output, &path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = fs::File::create(&target)
            .with_context(|| format!("creating {}", target.display()))?;
        io::copy(&mut file.reader(), &mut writer).with_context(|| format!("extracting {path}"))?;

        if decompile && path.ends_with(".rpyc") {
            let text = file
                .read_all()
                .map_err(anyhow::Error::from)
                .and_then(|data| decompile_bytes(data, options));
            match text {
                Ok(text) => fs::write(target.with_extension("rpy"), text)?,
                Err(e) => log::error!("{path}: {e:#}"),
            }
        }
    }
    Ok(())
}

fn decompile(
    input: &Path,
    output: Option<&Path>,
    source: Option<&Path>,
    options: &DecompileOptions,
) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let container = load_script(data).with_context(|| format!("loading {}", input.display()))?;

    if let Some(source) = source {
        let source_text =
            fs::read(source).with_context(|| format!("reading {}", source.display()))?;
        if container.verify_source_digest(&source_text) {
            log::info!("{} matches the embedded digest", source.display());
        }
    }

    let text = decompile_script(&container, options)
        .with_context(|| format!("decompiling {}", input.display()))?;
    let output = output.map_or_else(|| input.with_extension("rpy"), Path::to_path_buf);
    fs::write(&output, text).with_context(|| format!("writing {}", output.display()))?;
    log::info!("wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    config.logger.init();

    match args.command {
        Command::List { archive } => list(&archive),
        Command::Extract {
            archive,
            output,
            decompile,
            style,
        } => extract(&archive, &output, decompile, &style.apply(&config.decompile)),
        Command::Decompile {
            input,
            output,
            source,
            style,
        } => decompile(
            &input,
            output.as_deref(),
            source.as_deref(),
            &style.apply(&config.decompile),
        ),
    }
}
