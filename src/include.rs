//! Per-file driver: decodes a source file, feeds its lines through the
//! engine, descends into included files and attaches the include chain to
//! every diagnostic that escapes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::encoding::Encoding;
use crate::engine::{Engine, FileScope, Step};
use crate::env::Site;
use crate::error::{ErrorKind, FilePosition, PreprocessorError};
use crate::strip::{strip_comments, Strictness};
use crate::text::split_lines;

/// Settings that shape how a single file is turned into output text
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub source_encoding: Encoding,
    /// Emit an empty line for every suppressed or directive line
    pub keep_lines: bool,
    pub remove_comments: bool,
    pub strictness: Strictness,
    /// Searched in order after the including file's own directory
    pub include_paths: Vec<PathBuf>,
}

/// The chain of files currently being processed, outermost first.
/// Each frame's line index tracks the line being processed in that file.
#[derive(Debug, Clone, Default)]
pub struct IncludeStack {
    frames: Vec<FilePosition>,
}

impl IncludeStack {
    pub fn new() -> Self {
        IncludeStack::default()
    }

    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.frames.push(FilePosition::new(path, 0));
    }

    pub fn pop(&mut self) -> Option<FilePosition> {
        self.frames.pop()
    }

    pub fn set_line(&mut self, line_index: usize) {
        if let Some(top) = self.frames.last_mut() {
            top.line_index = line_index;
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        let target = canonical(path);
        self.frames.iter().any(|f| canonical(&f.path) == target)
    }

    /// Copy of the chain, innermost first
    pub fn snapshot(&self) -> Vec<FilePosition> {
        self.frames.iter().rev().cloned().collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Result of processing one root file
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Text {
        text: String,
        /// The root file started with a UTF-8 byte order mark
        had_bom: bool,
        outname: Option<String>,
    },
    /// `excludeif` fired before any line was emitted
    Excluded,
}

enum FileEnd {
    Completed,
    Excluded,
}

struct Processor<'p, 'e> {
    engine: &'p mut Engine<'e>,
    options: &'p ProcessOptions,
    stack: IncludeStack,
    out: String,
    emitted: usize,
}

/// Process `source` and everything it includes into a single output buffer.
pub fn preprocess_file(
    source: &Path,
    engine: &mut Engine,
    options: &ProcessOptions,
) -> Result<FileOutcome, PreprocessorError> {
    let mut processor = Processor {
        engine,
        options,
        stack: IncludeStack::new(),
        out: String::new(),
        emitted: 0,
    };
    processor.stack.push(source);
    let (end, had_bom) = processor.process(source)?;

    if matches!(end, FileEnd::Excluded) && processor.emitted == 0 {
        return Ok(FileOutcome::Excluded);
    }

    let mut text = processor.out;
    if options.remove_comments {
        text = strip_comments(&text, options.strictness).map_err(|e| {
            PreprocessorError::new(ErrorKind::Syntax, format!("{} in processed output", e))
                .with_frames(vec![FilePosition::new(source, 0)])
        })?;
    }
    Ok(FileOutcome::Text {
        text,
        had_bom,
        outname: processor.engine.outname().map(str::to_string),
    })
}

impl Processor<'_, '_> {
    fn fail(&self, err: PreprocessorError, line: &str) -> PreprocessorError {
        err.with_line(line).with_frames(self.stack.snapshot())
    }

    fn read(&self, path: &Path) -> Result<(String, bool), PreprocessorError> {
        let bytes = fs::read(path).map_err(|e| {
            PreprocessorError::io(format!("cannot read file ({})", e), path)
                .with_frames(self.stack.snapshot())
        })?;
        let decoded = self.options.source_encoding.decode(&bytes).map_err(|e| {
            PreprocessorError::io(format!("cannot decode file ({})", e), path)
                .with_frames(self.stack.snapshot())
        })?;
        Ok((decoded.text, decoded.had_bom))
    }

    /// Process the file on top of the stack
    fn process(&mut self, path: &Path) -> Result<(FileEnd, bool), PreprocessorError> {
        let (text, had_bom) = self.read(path)?;
        let lines = split_lines(&text);
        let mut scope = FileScope::new();

        for (index, line) in lines.iter().enumerate() {
            self.stack.set_line(index);
            let step = self
                .engine
                .process_line(&mut scope, line.content, Site::new(path, index))
                .map_err(|e| self.fail(e, line.content))?;

            match step {
                Step::Emit(output) => {
                    self.out.push_str(&output);
                    self.out.push_str(line.terminator);
                    self.emitted += 1;
                }
                Step::Skip => {
                    if self.options.keep_lines {
                        self.out.push_str(line.terminator);
                    }
                }
                Step::Include(target) => {
                    let resolved = self
                        .resolve_include(path, &target)
                        .map_err(|e| self.fail(e, line.content))?;
                    if self.stack.contains(&resolved) {
                        let err = PreprocessorError::new(
                            ErrorKind::Syntax,
                            format!("recursive include of '{}'", resolved.display()),
                        );
                        return Err(self.fail(err, line.content));
                    }
                    self.stack.push(&resolved);
                    let result = self.process(&resolved);
                    self.stack.pop();
                    result?;
                }
                Step::Exclude => return Ok((FileEnd::Excluded, had_bom)),
            }
        }

        if let Some(opened_at) = scope.conditions.innermost_open() {
            self.stack.set_line(opened_at);
            let err = PreprocessorError::new(
                ErrorKind::UnbalancedDirective,
                format!("'if' opened at line {} is never closed", opened_at + 1),
            );
            let line = lines.get(opened_at).map(|l| l.content).unwrap_or("");
            return Err(self.fail(err, line));
        }
        Ok((FileEnd::Completed, had_bom))
    }

    fn resolve_include(&self, current: &Path, target: &str) -> Result<PathBuf, PreprocessorError> {
        let target_path = Path::new(target);
        let candidates: Vec<PathBuf> = if target_path.is_absolute() {
            vec![target_path.to_path_buf()]
        } else {
            current
                .parent()
                .map(|dir| dir.join(target_path))
                .into_iter()
                .chain(self.options.include_paths.iter().map(|p| p.join(target_path)))
                .collect()
        };

        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                PreprocessorError::new(
                    ErrorKind::IncludeNotFound,
                    format!("cannot find included file '{}'", target),
                )
            })
    }
}
