use std::fmt;
use std::path::{Path, PathBuf};

use crate::eval::EvalError;

/// A zero-based position in a source file; one frame of the include chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePosition {
    pub path: PathBuf,
    /// 0-based line index
    pub line_index: usize,
}

impl FilePosition {
    pub fn new(path: impl Into<PathBuf>, line_index: usize) -> Self {
        FilePosition {
            path: path.into(),
            line_index,
        }
    }

    /// 1-based line number for presentation
    pub fn line_number(&self) -> usize {
        self.line_index + 1
    }
}

impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line_number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    UnbalancedDirective,
    UnknownVariable,
    TypeMismatch,
    UnknownFunction,
    IncludeNotFound,
    ActionRejected,
    /// Raised by an `error` directive
    UserError,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::UnbalancedDirective => "unbalanced directive",
            ErrorKind::UnknownVariable => "unknown variable",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnknownFunction => "unknown function",
            ErrorKind::IncludeNotFound => "include not found",
            ErrorKind::ActionRejected => "action rejected",
            ErrorKind::UserError => "user error",
            ErrorKind::Io => "i/o failure",
        };
        write!(f, "{}", name)
    }
}

/// The single diagnostic type surfaced by the engine.
///
/// `frames` is the include chain at the moment of failure, innermost first:
/// `frames[0]` is where the fault happened and the last frame is the root file.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessorError {
    kind: ErrorKind,
    message: String,
    line_text: Option<String>,
    frames: Vec<FilePosition>,
}

impl PreprocessorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        PreprocessorError {
            kind,
            message: message.into(),
            line_text: None,
            frames: Vec::new(),
        }
    }

    pub fn io(message: impl Into<String>, path: &Path) -> Self {
        PreprocessorError::new(ErrorKind::Io, format!("{}: {}", message.into(), path.display()))
    }

    /// Attach the offending source line, unless one is already recorded
    pub fn with_line(mut self, text: &str) -> Self {
        if self.line_text.is_none() {
            self.line_text = Some(text.to_string());
        }
        self
    }

    /// Attach the include chain, unless one is already recorded
    pub fn with_frames(mut self, frames: Vec<FilePosition>) -> Self {
        if self.frames.is_empty() {
            self.frames = frames;
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line_text(&self) -> Option<&str> {
        self.line_text.as_deref()
    }

    pub fn frames(&self) -> &[FilePosition] {
        &self.frames
    }

    /// Where the fault happened
    pub fn location(&self) -> Option<&FilePosition> {
        self.frames.first()
    }
}

impl fmt::Display for PreprocessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(pos) => write!(f, "{}: {}: {}", pos, self.kind, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(line) = &self.line_text {
            write!(f, "\n    | {}", line.trim_end())?;
        }
        for frame in self.frames.iter().skip(1) {
            write!(f, "\n    included from {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for PreprocessorError {}

impl From<EvalError> for PreprocessorError {
    fn from(err: EvalError) -> Self {
        let kind = match &err {
            EvalError::UnknownVariable(_) => ErrorKind::UnknownVariable,
            EvalError::TypeMismatch { .. } | EvalError::InvalidArgument { .. } => {
                ErrorKind::TypeMismatch
            }
            EvalError::UnknownFunction { .. } => ErrorKind::UnknownFunction,
            EvalError::SyntaxError { .. } | EvalError::Arithmetic(_) | EvalError::ReadOnly { .. } => {
                ErrorKind::Syntax
            }
            EvalError::Extension(_) => ErrorKind::ActionRejected,
        };
        PreprocessorError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_chain() {
        let err = PreprocessorError::new(ErrorKind::UnbalancedDirective, "endif without if")
            .with_line("//#endif")
            .with_frames(vec![
                FilePosition::new("/p/inc.txt", 2),
                FilePosition::new("/p/Main.java", 25),
            ]);
        assert_eq!(
            err.to_string(),
            "/p/inc.txt:3: unbalanced directive: endif without if\n    | //#endif\n    included from /p/Main.java:26"
        );
    }

    #[test]
    fn test_first_attachment_wins() {
        let err = PreprocessorError::new(ErrorKind::Syntax, "bad")
            .with_frames(vec![FilePosition::new("a", 0)])
            .with_frames(vec![FilePosition::new("b", 5)])
            .with_line("one")
            .with_line("two");
        assert_eq!(err.frames(), &[FilePosition::new("a", 0)]);
        assert_eq!(err.line_text(), Some("one"));
    }

    #[test]
    fn test_eval_error_mapping() {
        let err: PreprocessorError = EvalError::UnknownVariable("X".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownVariable);
        assert_eq!(err.message(), "unknown variable 'X'");
    }
}
