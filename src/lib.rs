//! Conditional-compilation preprocessor for sources with C-family comments.
//!
//! Directives live in `//#` line comments (`if`, `elif`, `else`, `endif`,
//! `define`, `include`, ...). Expressions are evaluated against a chain of
//! variable resolvers; output is written to a destination tree.

pub mod config;
pub mod directive;
pub mod encoding;
pub mod engine;
pub mod env;
pub mod error;
pub mod eval;
pub mod expr;
pub mod extension;
pub mod globals;
pub mod include;
pub mod lexer;
pub mod logger;
pub mod model;
pub mod output;
pub mod session;
pub mod sources;
pub mod strip;
pub mod text;
pub mod value;

pub use config::{CommentMode, Config, ErrorPolicy};
pub use encoding::Encoding;
pub use engine::{Engine, FileScope, LineState, Step};
pub use env::{Environment, Resolver, Site};
pub use error::{ErrorKind, FilePosition, PreprocessorError};
pub use eval::{evaluate, EvalError};
pub use extension::{Extension, NoExtension};
pub use include::{preprocess_file, FileOutcome, IncludeStack, ProcessOptions};
pub use logger::{CaptureLogger, ConsoleLogger, FileLogger, Level, Logger, NullLogger};
pub use model::{FileRecord, FileStatus, Summary};
pub use session::{CancelFlag, ErrorListener, Session};
pub use sources::{collect_sources, SourceFile, SourceFilter};
pub use strip::{strip_comments, Strictness, UnterminatedComment};
pub use text::replace_string_prefix;
pub use value::{Value, ValueType};
