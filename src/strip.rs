//! Comment removal for C-family sources.
//!
//! A character-level state machine: string literals are copied verbatim so
//! comment-like sequences inside them survive, line comments are dropped up
//! to (not including) the newline, block comments are dropped entirely.

use thiserror::Error;

/// How to treat end of input inside a block comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Drop the unterminated comment silently
    #[default]
    Lenient,
    /// Report `UnterminatedComment`
    Strict,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unterminated block comment starting at offset {offset}")]
pub struct UnterminatedComment {
    /// Byte offset of the opening `/*`
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    InString,
    EscapeInString,
    SawSlash,
    LineComment,
    /// Line comment ended by `\r`; a following `\n` belongs to the same terminator
    LineCommentCr,
    BlockComment,
    BlockStar,
}

/// Remove `//` and `/* */` comments outside string literals.
pub fn strip_comments(text: &str, strictness: Strictness) -> Result<String, UnterminatedComment> {
    let mut out = String::with_capacity(text.len());
    let mut state = State::Normal;
    let mut block_start = 0;

    for (offset, ch) in text.char_indices() {
        state = match state {
            State::Normal => normal(ch, &mut out),
            State::InString => {
                out.push(ch);
                match ch {
                    '\\' => State::EscapeInString,
                    '"' => State::Normal,
                    _ => State::InString,
                }
            }
            State::EscapeInString => {
                out.push(ch);
                State::InString
            }
            State::SawSlash => match ch {
                '/' => State::LineComment,
                '*' => {
                    block_start = offset - 1;
                    State::BlockComment
                }
                '"' => {
                    out.push('/');
                    out.push(ch);
                    State::InString
                }
                _ => {
                    out.push('/');
                    out.push(ch);
                    State::Normal
                }
            },
            State::LineComment => match ch {
                '\n' => {
                    out.push(ch);
                    State::Normal
                }
                '\r' => {
                    out.push(ch);
                    State::LineCommentCr
                }
                _ => State::LineComment,
            },
            State::LineCommentCr => match ch {
                '\n' => {
                    out.push(ch);
                    State::Normal
                }
                _ => normal(ch, &mut out),
            },
            State::BlockComment => match ch {
                '*' => State::BlockStar,
                _ => State::BlockComment,
            },
            State::BlockStar => match ch {
                '/' => State::Normal,
                '*' => State::BlockStar,
                _ => State::BlockComment,
            },
        };
    }

    match state {
        State::SawSlash => out.push('/'),
        State::BlockComment | State::BlockStar if strictness == Strictness::Strict => {
            return Err(UnterminatedComment {
                offset: block_start,
            });
        }
        _ => {}
    }

    Ok(out)
}

fn normal(ch: char, out: &mut String) -> State {
    match ch {
        '/' => State::SawSlash,
        '"' => {
            out.push(ch);
            State::InString
        }
        _ => {
            out.push(ch);
            State::Normal
        }
    }
}
