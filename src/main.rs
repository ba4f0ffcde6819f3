use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpre::config::{parse_definition, CommentMode, Config, ErrorPolicy, DEFAULT_CONFIG_FILE};
use cpre::text::truncate;
use cpre::{
    collect_sources, evaluate, strip_comments, ConsoleLogger, Encoding, Environment, FileLogger,
    Level, Logger, NoExtension, Session, Site, SourceFilter, Strictness, Value,
};

#[derive(Parser)]
#[command(name = "cpre")]
#[command(about = "Conditional-compilation preprocessor driven by directives in // comments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess source trees into a destination directory
    Process {
        /// Config file (default: cpre.toml in the current directory, if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Source root or single file; replaces `sources` from the config
        #[arg(long = "source")]
        sources: Vec<PathBuf>,

        /// Destination directory
        #[arg(long)]
        destination: Option<PathBuf>,

        /// Define a global variable: NAME or NAME=VALUE
        #[arg(short = 'D', long = "define", value_parser = parse_definition)]
        defines: Vec<(String, Value)>,

        /// Build-tool property: NAME=VALUE
        #[arg(long = "property", value_parser = parse_definition)]
        properties: Vec<(String, Value)>,

        /// Global definition file, read before any source
        #[arg(long = "global-file")]
        global_files: Vec<PathBuf>,

        /// Extra directory searched by `include`
        #[arg(long = "include-path")]
        include_paths: Vec<PathBuf>,

        #[arg(long)]
        source_encoding: Option<Encoding>,

        #[arg(long)]
        target_encoding: Option<Encoding>,

        /// Strip all comments from the output
        #[arg(long)]
        remove_comments: bool,

        /// Treat a block comment left open at end of file as an error
        #[arg(long)]
        strict_comments: bool,

        /// Replace removed lines with empty lines to keep line numbers
        #[arg(long)]
        keep_lines: bool,

        /// Empty the destination before processing
        #[arg(long)]
        clear: bool,

        /// Process everything but write nothing
        #[arg(long)]
        dry_run: bool,

        /// Leave destination files alone when their content would not change
        #[arg(long)]
        skip_unchanged: bool,

        /// Unknown variables evaluate to false instead of failing
        #[arg(long)]
        unknown_as_false: bool,

        /// Keep going after a file fails and report every error at the end
        #[arg(long)]
        best_effort: bool,

        /// Write a JSON summary of the run
        #[arg(long)]
        report: Option<PathBuf>,

        /// Append log messages to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,

        #[arg(short, long)]
        verbose: bool,

        #[arg(short, long, conflicts_with = "verbose")]
        quiet: bool,
    },

    /// Evaluate an expression and print its value
    Eval {
        expression: String,

        /// Define a variable: NAME or NAME=VALUE
        #[arg(short = 'D', long = "define", value_parser = parse_definition)]
        defines: Vec<(String, Value)>,

        #[arg(long)]
        unknown_as_false: bool,
    },

    /// Remove comments from a file and print the result
    Strip {
        file: PathBuf,

        /// Fail on an unterminated block comment
        #[arg(long)]
        strict: bool,

        #[arg(long, default_value = "utf-8")]
        encoding: Encoding,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            config,
            sources,
            destination,
            defines,
            properties,
            global_files,
            include_paths,
            source_encoding,
            target_encoding,
            remove_comments,
            strict_comments,
            keep_lines,
            clear,
            dry_run,
            skip_unchanged,
            unknown_as_false,
            best_effort,
            report,
            log_file,
            verbose,
            quiet,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if !sources.is_empty() {
                cfg.sources = sources;
            }
            if let Some(destination) = destination {
                cfg.destination = destination;
            }
            cfg.global_files.extend(global_files);
            cfg.include_paths.extend(include_paths);
            if let Some(encoding) = source_encoding {
                cfg.source_encoding = encoding;
            }
            if let Some(encoding) = target_encoding {
                cfg.target_encoding = encoding;
            }
            if remove_comments {
                cfg.comments = CommentMode::Remove;
            }
            cfg.strict_comments |= strict_comments;
            cfg.keep_lines |= keep_lines;
            cfg.clear_destination |= clear;
            cfg.dry_run |= dry_run;
            cfg.skip_unchanged |= skip_unchanged;
            cfg.unknown_as_false |= unknown_as_false;
            if best_effort {
                cfg.error_policy = ErrorPolicy::BestEffort;
            }

            let level = if verbose {
                Level::Debug
            } else if quiet {
                Level::Warn
            } else {
                Level::Info
            };
            let logger: Box<dyn Logger> = match log_file {
                Some(path) => Box::new(
                    FileLogger::create(&path, level)
                        .with_context(|| format!("Cannot open log file {}", path.display()))?,
                ),
                None => Box::new(ConsoleLogger::new(level)),
            };

            run_process(
                cfg,
                defines.into_iter().collect(),
                properties.into_iter().collect(),
                report.as_deref(),
                logger.as_ref(),
            )
        }
        Commands::Eval {
            expression,
            defines,
            unknown_as_false,
        } => run_eval(&expression, defines.into_iter().collect(), unknown_as_false),
        Commands::Strip {
            file,
            strict,
            encoding,
        } => run_strip(&file, strict, encoding),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                Config::load(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn run_process(
    config: Config,
    definitions: BTreeMap<String, Value>,
    properties: BTreeMap<String, Value>,
    report: Option<&Path>,
    logger: &dyn Logger,
) -> Result<()> {
    logger.info("Collecting source files...");
    let filter = SourceFilter::new(
        &config.extensions,
        &config.exclude_extensions,
        &config.exclude_dirs,
    );
    let sources =
        collect_sources(&config.sources, &filter).context("Failed to collect source files")?;
    logger.info(&format!(
        "Found {} file(s) in {}",
        sources.len(),
        config
            .sources
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let mut extension = NoExtension;
    let mut session = Session::new(config, logger, &mut extension, Vec::new())
        .with_definitions(definitions)
        .with_properties(properties);
    let summary = session.run(&sources).context("Preprocessing failed")?;

    if let Some(path) = report {
        let json = summary.to_json().context("Failed to serialize summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write report {}", path.display()))?;
    }

    if !summary.is_success() {
        bail!("{} of {} file(s) failed", summary.counts.failed, summary.counts.processed);
    }
    Ok(())
}

fn run_eval(expression: &str, definitions: BTreeMap<String, Value>, unknown_as_false: bool) -> Result<()> {
    let env = Environment::for_file(
        Arc::new(definitions),
        Arc::new(BTreeMap::new()),
        Local::now(),
        unknown_as_false,
    );
    let file = PathBuf::from("<command line>");
    let value = evaluate(expression, &env, Site::new(&file, 0), &mut NoExtension)
        .with_context(|| format!("Cannot evaluate '{}'", truncate(expression, 60)))?;
    println!("{}", value);
    Ok(())
}

fn run_strip(file: &Path, strict: bool, encoding: Encoding) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let decoded = encoding
        .decode(&bytes)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Cannot decode {}", file.display()))?;
    let strictness = if strict {
        Strictness::Strict
    } else {
        Strictness::Lenient
    };
    let stripped = strip_comments(&decoded.text, strictness)
        .with_context(|| format!("Cannot strip comments from {}", file.display()))?;
    print!("{}", stripped);
    Ok(())
}
