use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use bundle_bridge::{
    File, bundle,
    concat_bundler::ConcatBundler,
    config::Config,
    types::OutputFormat,
};
use clap::{ArgAction, Parser};
use log::{debug, info};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "bundle-bridge", version, about)]
struct Cli {
    /// Config file (defaults to bundle-bridge.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry module, relative to the root directory
    #[arg(short, long)]
    entry: Option<String>,

    /// Directory whose files are streamed into the bundler
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Emit an inline source map
    #[arg(long)]
    source_map: bool,

    /// Module id to leave unresolved (repeatable)
    #[arg(long = "external", value_name = "ID")]
    external: Vec<String>,

    /// Output file or directory; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = resolve_config(cli)?;
    let root = config.root_dir();
    let mut bundle_config = config.to_bundle_config()?;
    bundle_config.entry = intake_key(&root, &bundle_config.entry);

    let bridge = bundle(bundle_config, Arc::new(ConcatBundler::new()));
    let mut sent = 0usize;
    for (key, path) in collect_files(&root)? {
        let contents =
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut file = File::new(key, contents);
        if root != Path::new(".") {
            file = file.with_base(root.to_string_lossy());
        }
        bridge.send(file).await?;
        sent += 1;
    }
    info!("Streamed {sent} file(s) from {}", root.display());

    let file = bridge.finish().await?;
    write_output(&file, config.output.as_deref())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Merge the config file (explicit or discovered) with command line overrides
fn resolve_config(cli: Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::discover(Path::new("."))?.unwrap_or_default(),
    };

    if cli.entry.is_some() {
        config.entry = cli.entry;
    }
    if cli.root.is_some() {
        config.root = cli.root;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if cli.source_map {
        config.source_map = true;
    }
    if !cli.external.is_empty() {
        config.external = cli.external;
    }
    if cli.output.is_some() {
        config.output = cli.output;
    }
    debug!("Resolved configuration: {config:?}");
    Ok(config)
}

/// Lookup key for a root-relative path, using forward slashes
fn intake_key(root: &Path, relative: &str) -> String {
    let relative = relative.trim_start_matches("./");
    if root == Path::new(".") {
        return relative.to_owned();
    }
    let root = root.to_string_lossy().replace('\\', "/");
    format!("{}/{relative}", root.trim_end_matches('/'))
}

fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?
            .to_string_lossy()
            .replace('\\', "/");
        files.push((intake_key(root, &relative), entry.into_path()));
    }
    Ok(files)
}

fn write_output(file: &File, output: Option<&Path>) -> Result<()> {
    let Some(output) = output else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&file.contents)?;
        return stdout.flush().context("Failed to write bundle to stdout");
    };

    let target = write_to_path(file, output)?;
    info!("Wrote {}", target.display());
    Ok(())
}

/// Write `file` to `output`, which names a directory when it exists as one or
/// ends with a path separator
fn write_to_path(file: &File, output: &Path) -> Result<PathBuf> {
    let names_dir = output.is_dir()
        || output
            .as_os_str()
            .to_string_lossy()
            .ends_with(std::path::is_separator);
    let target = if names_dir {
        output.join(file.relative())
    } else {
        output.to_path_buf()
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&target, &file.contents)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(target)
}
