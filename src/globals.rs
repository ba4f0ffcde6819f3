//! Global-variable definition files.
//!
//! These files are read before any source file. Only `global`, `define` and
//! `undef` directives are accepted; plain lines are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use crate::directive::{classify_line, Directive, LineKind};
use crate::encoding::Encoding;
use crate::env::{Environment, Site};
use crate::error::{ErrorKind, FilePosition, PreprocessorError};
use crate::eval::evaluate;
use crate::extension::Extension;
use crate::logger::Logger;
use crate::text::split_lines;
use crate::value::Value;

/// Apply every file in order to `env`, whose writable head is the global store.
pub fn load_global_files(
    paths: &[PathBuf],
    env: &mut Environment,
    encoding: Encoding,
    extension: &mut dyn Extension,
    logger: &dyn Logger,
) -> Result<(), PreprocessorError> {
    for path in paths {
        logger.debug(&format!("Loading global definitions from {}", path.display()));
        load_global_file(path, env, encoding, extension)?;
    }
    Ok(())
}

fn load_global_file(
    path: &Path,
    env: &mut Environment,
    encoding: Encoding,
    extension: &mut dyn Extension,
) -> Result<(), PreprocessorError> {
    let bytes = fs::read(path)
        .map_err(|e| PreprocessorError::io(format!("cannot read global file ({})", e), path))?;
    let decoded = encoding
        .decode(&bytes)
        .map_err(|e| PreprocessorError::io(format!("cannot decode global file ({})", e), path))?;

    for (index, line) in split_lines(&decoded.text).iter().enumerate() {
        apply_line(line.content, Site::new(path, index), env, extension).map_err(|e| {
            e.with_line(line.content)
                .with_frames(vec![FilePosition::new(path, index)])
        })?;
    }
    Ok(())
}

fn apply_line(
    content: &str,
    site: Site,
    env: &mut Environment,
    extension: &mut dyn Extension,
) -> Result<(), PreprocessorError> {
    let directive = match classify_line(content)? {
        LineKind::Directive(directive) => directive,
        LineKind::Text | LineKind::Toggle { .. } => return Ok(()),
    };

    match directive {
        Directive::Global { name, expr } | Directive::Define { name, expr } => {
            let value = match expr {
                Some(expr) => evaluate(expr, env, site, extension)?,
                None => Value::Bool(true),
            };
            env.assign(name, value)?;
        }
        Directive::Undef(name) => {
            env.remove(name)?;
        }
        _ => {
            return Err(PreprocessorError::new(
                ErrorKind::Syntax,
                format!(
                    "only 'global', 'define' and 'undef' are allowed in a global definition file, found '{}'",
                    content.trim()
                ),
            ));
        }
    }
    Ok(())
}
