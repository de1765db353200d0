//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use bookshelf_downloader::ManagerConfig;
use bookshelf_downloader::config::{DEFAULT_MAX_CONCURRENT_PARTS, DEFAULT_MAX_PART_RETRIES};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, parser::ValueSource};

/// Download audiobook and podcast files from a library server.
///
/// Queues the item described by a JSON manifest, transfers its files with
/// resume support and moves them into the output directory. With `--db`,
/// unfinished downloads survive restarts.
#[derive(Parser, Debug)]
#[command(name = "bookshelf-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Library server base address (e.g. https://abs.example.com)
    #[arg(long)]
    pub server: Option<String>,

    /// Session token appended to every download URL
    #[arg(long)]
    pub token: Option<String>,

    /// JSON manifest describing the item to download
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Library folder finished files are moved into
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Staging directory for partial files
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// SQLite file for persisted queue state
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Maximum concurrent part transfers (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONCURRENT_PARTS as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Re-admissions of a part after transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_PART_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// JSON config file; command line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Which flags were given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliValueSources {
    pub concurrency: bool,
    pub max_retries: bool,
    pub temp_dir: bool,
}

pub fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        concurrency: is_commandline_value(matches, "concurrency"),
        max_retries: is_commandline_value(matches, "max_retries"),
        temp_dir: is_commandline_value(matches, "temp_dir"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Layers command line flags over the file config (or defaults).
///
/// A flag overrides the file only when it was typed; clap defaults never
/// shadow a value from the file.
pub fn apply_cli_overrides(
    args: &Args,
    sources: &CliValueSources,
    file_config: Option<ManagerConfig>,
) -> ManagerConfig {
    let from_file = file_config.is_some();
    let mut config = file_config.unwrap_or_default();

    if sources.concurrency || !from_file {
        config.max_concurrent_parts = usize::from(args.concurrency);
    }
    if sources.max_retries || !from_file {
        config.max_part_retries = u32::from(args.max_retries);
    }
    if (sources.temp_dir || config.temp_dir.is_none())
        && let Some(temp_dir) = &args.temp_dir
    {
        config.temp_dir = Some(temp_dir.clone());
    }
    config
}
