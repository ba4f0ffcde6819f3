use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::encoding::Encoding;
use crate::error::{ErrorKind, PreprocessorError};
use crate::include::ProcessOptions;
use crate::output::CommitOptions;
use crate::strip::Strictness;
use crate::value::{from_toml, Value};

/// Name looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "cpre.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommentMode {
    #[default]
    Keep,
    Remove,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    #[default]
    StopOnFirst,
    BestEffort,
}

/// Session configuration, usually read from `cpre.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub source_encoding: Encoding,
    pub target_encoding: Encoding,
    pub comments: CommentMode,
    /// Fail on a block comment left open at end of output
    pub strict_comments: bool,
    pub keep_lines: bool,
    pub clear_destination: bool,
    pub dry_run: bool,
    pub skip_unchanged: bool,
    pub unknown_as_false: bool,
    pub error_policy: ErrorPolicy,
    pub global_files: Vec<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    /// Extensions of files to preprocess (`java`, `.java` and `*.java` are equivalent)
    pub extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    /// Directory names skipped while walking the sources
    pub exclude_dirs: Vec<String>,
    pub globals: BTreeMap<String, toml::Value>,
    pub properties: BTreeMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sources: vec![PathBuf::from("src")],
            destination: PathBuf::from("preprocessed"),
            source_encoding: Encoding::Utf8,
            target_encoding: Encoding::Utf8,
            comments: CommentMode::Keep,
            strict_comments: false,
            keep_lines: false,
            clear_destination: false,
            dry_run: false,
            skip_unchanged: false,
            unknown_as_false: false,
            error_policy: ErrorPolicy::StopOnFirst,
            global_files: Vec::new(),
            include_paths: Vec::new(),
            extensions: ["java", "txt", "htm", "html"].map(String::from).to_vec(),
            exclude_extensions: vec!["xml".to_string()],
            exclude_dirs: vec![".git".to_string()],
            globals: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load a config file; relative paths inside it are taken relative to its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        let mut config = Config::from_toml_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.global_values()?;
        config.property_values()?;
        Ok(config)
    }

    /// Make every relative path relative to `base`
    pub fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.sources.iter_mut().for_each(join);
        join(&mut self.destination);
        self.global_files.iter_mut().for_each(join);
        self.include_paths.iter_mut().for_each(join);
    }

    pub fn global_values(&self) -> Result<BTreeMap<String, Value>, PreprocessorError> {
        convert_table(&self.globals, "global")
    }

    pub fn property_values(&self) -> Result<BTreeMap<String, Value>, PreprocessorError> {
        convert_table(&self.properties, "property")
    }

    pub fn strictness(&self) -> Strictness {
        if self.strict_comments {
            Strictness::Strict
        } else {
            Strictness::Lenient
        }
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            source_encoding: self.source_encoding,
            keep_lines: self.keep_lines,
            remove_comments: self.comments == CommentMode::Remove,
            strictness: self.strictness(),
            include_paths: self.include_paths.clone(),
        }
    }

    pub fn commit_options(&self) -> CommitOptions {
        CommitOptions {
            dry_run: self.dry_run,
            skip_unchanged: self.skip_unchanged,
        }
    }
}

fn convert_table(
    table: &BTreeMap<String, toml::Value>,
    what: &str,
) -> Result<BTreeMap<String, Value>, PreprocessorError> {
    table
        .iter()
        .map(|(name, raw)| {
            from_toml(raw).map(|v| (name.clone(), v)).ok_or_else(|| {
                PreprocessorError::new(
                    ErrorKind::Syntax,
                    format!("{} '{}' must be a scalar or an array, not a table", what, name),
                )
            })
        })
        .collect()
}

/// Parse a `NAME` or `NAME=VALUE` definition from the command line.
///
/// A bare name defines `true`; values go through literal parsing.
pub fn parse_definition(text: &str) -> Result<(String, Value), String> {
    let (name, value) = match text.split_once('=') {
        Some((name, value)) => (name.trim(), Value::parse_literal(value.trim())),
        None => (text.trim(), Value::Bool(true)),
    };
    let valid = name
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return Err(format!("invalid variable name '{}'", name));
    }
    Ok((name.to_string(), value))
}
