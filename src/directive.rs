//! Line classification and directive parsing.
//!
//! A directive line starts (after indentation) with `//#`. Toggle-comment
//! lines start with `//$` (body is processed) or `//$$` (body is verbatim).

use crate::error::{ErrorKind, PreprocessorError};
use crate::text::indentation;

pub const DIRECTIVE_PREFIX: &str = "//#";
pub const TOGGLE_PREFIX: &str = "//$";
pub const RAW_TOGGLE_PREFIX: &str = "//$$";
pub const INLINE_OPEN: &str = "/*$";
pub const INLINE_CLOSE: &str = "$*/";
pub const INLINE_TAIL_END: &str = "/*-*/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    If(&'a str),
    IfDef(&'a str),
    IfNDef(&'a str),
    Elif(&'a str),
    Else,
    EndIf,
    ExcludeIf(&'a str),
    Define { name: &'a str, expr: Option<&'a str> },
    Undef(&'a str),
    Global { name: &'a str, expr: Option<&'a str> },
    Include(&'a str),
    Action(&'a str),
    OutName(&'a str),
    Error(&'a str),
    Warning(&'a str),
    Echo(&'a str),
    /// `//#-`
    OutputOff,
    /// `//#+`
    OutputOn,
    /// `//#//`
    CommentNext,
    Unknown(&'a str),
}

impl Directive<'_> {
    /// Directives that shape the conditional stack and are interpreted even
    /// inside suppressed regions
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Directive::If(_)
                | Directive::IfDef(_)
                | Directive::IfNDef(_)
                | Directive::Elif(_)
                | Directive::Else
                | Directive::EndIf
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Text,
    Directive(Directive<'a>),
    Toggle {
        indent: &'a str,
        body: &'a str,
        raw: bool,
    },
}

fn syntax(message: impl Into<String>) -> PreprocessorError {
    PreprocessorError::new(ErrorKind::Syntax, message)
}

/// Classify one line (without terminator).
pub fn classify_line(content: &str) -> Result<LineKind<'_>, PreprocessorError> {
    let indent = indentation(content);
    let trimmed = &content[indent.len()..];

    if let Some(body) = trimmed.strip_prefix(DIRECTIVE_PREFIX) {
        return parse_directive(body).map(LineKind::Directive);
    }
    if let Some(body) = trimmed.strip_prefix(RAW_TOGGLE_PREFIX) {
        return Ok(LineKind::Toggle {
            indent,
            body,
            raw: true,
        });
    }
    if let Some(body) = trimmed.strip_prefix(TOGGLE_PREFIX) {
        return Ok(LineKind::Toggle {
            indent,
            body,
            raw: false,
        });
    }
    Ok(LineKind::Text)
}

/// True for a `//#` line whose keyword does not shape the conditional
/// stack. Suppressed regions skip such lines without parsing their arguments.
pub fn is_plain_directive(content: &str) -> bool {
    let trimmed = &content[indentation(content).len()..];
    match trimmed.strip_prefix(DIRECTIVE_PREFIX) {
        Some(body) => !matches!(
            split_keyword(body).0,
            "if" | "ifdef" | "ifndef" | "elif" | "else" | "endif"
        ),
        None => false,
    }
}

fn split_keyword(body: &str) -> (&str, &str) {
    let keyword_len = body
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(body.len());
    body.split_at(keyword_len)
}

/// Parse the text following `//#`.
pub fn parse_directive(body: &str) -> Result<Directive<'_>, PreprocessorError> {
    if body.starts_with("//") {
        return Ok(Directive::CommentNext);
    }
    match body.trim_end() {
        "-" => return Ok(Directive::OutputOff),
        "+" => return Ok(Directive::OutputOn),
        _ => {}
    }

    let (keyword, rest) = split_keyword(body);
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Ok(Directive::Unknown(body.trim_end()));
    }
    let args = rest.trim();

    let directive = match keyword {
        "if" => Directive::If(expression(keyword, args)?),
        "ifdef" => Directive::IfDef(identifier(keyword, args)?),
        "ifndef" => Directive::IfNDef(identifier(keyword, args)?),
        "elif" => Directive::Elif(expression(keyword, args)?),
        "else" => {
            no_arguments(keyword, args)?;
            Directive::Else
        }
        "endif" => {
            no_arguments(keyword, args)?;
            Directive::EndIf
        }
        "excludeif" => Directive::ExcludeIf(expression(keyword, args)?),
        "define" => {
            let (name, expr) = assignment(keyword, args)?;
            Directive::Define { name, expr }
        }
        "undef" => Directive::Undef(identifier(keyword, args)?),
        "global" => {
            let (name, expr) = assignment(keyword, args)?;
            Directive::Global { name, expr }
        }
        "include" => Directive::Include(expression(keyword, args)?),
        "action" => Directive::Action(expression(keyword, args)?),
        "outname" => Directive::OutName(expression(keyword, args)?),
        "error" => Directive::Error(expression(keyword, args)?),
        "warning" => Directive::Warning(expression(keyword, args)?),
        "echo" => Directive::Echo(expression(keyword, args)?),
        _ => Directive::Unknown(body.trim_end()),
    };
    Ok(directive)
}

fn expression<'a>(keyword: &str, args: &'a str) -> Result<&'a str, PreprocessorError> {
    if args.is_empty() {
        Err(syntax(format!("'{}' requires an expression", keyword)))
    } else {
        Ok(args)
    }
}

fn no_arguments(keyword: &str, args: &str) -> Result<(), PreprocessorError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(syntax(format!("unexpected text after '{}': {}", keyword, args)))
    }
}

fn identifier_len(text: &str) -> usize {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

fn identifier<'a>(keyword: &str, args: &'a str) -> Result<&'a str, PreprocessorError> {
    let len = identifier_len(args);
    if len == 0 || len != args.len() {
        Err(syntax(format!("'{}' requires a single variable name", keyword)))
    } else {
        Ok(args)
    }
}

/// `name` or `name = expr`
fn assignment<'a>(
    keyword: &str,
    args: &'a str,
) -> Result<(&'a str, Option<&'a str>), PreprocessorError> {
    let len = identifier_len(args);
    if len == 0 {
        return Err(syntax(format!("'{}' requires a variable name", keyword)));
    }
    let name = &args[..len];
    let rest = args[len..].trim_start();
    if rest.is_empty() {
        return Ok((name, None));
    }
    let Some(expr) = rest.strip_prefix('=') else {
        return Err(syntax(format!(
            "expected '=' after '{} {}', found '{}'",
            keyword, name, rest
        )));
    };
    if expr.starts_with('=') {
        return Err(syntax(format!("expected '=' after '{} {}', found '=='", keyword, name)));
    }
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(syntax(format!("missing value after '{} {} ='", keyword, name)));
    }
    Ok((name, Some(expr)))
}

/// Replace each `/*$ expr $*/` with the text `eval` returns. When a `/*-*/`
/// follows before the next marker, the text between the marker and the
/// terminator is the placeholder default and is discarded with it.
pub fn substitute_inline<F>(line: &str, mut eval: F) -> Result<String, PreprocessorError>
where
    F: FnMut(&str) -> Result<String, PreprocessorError>,
{
    if !line.contains(INLINE_OPEN) {
        return Ok(line.to_string());
    }

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find(INLINE_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + INLINE_OPEN.len()..];
        let close = after_open
            .find(INLINE_CLOSE)
            .ok_or_else(|| syntax("unterminated inline expression, expected '$*/'"))?;
        out.push_str(&eval(after_open[..close].trim())?);
        rest = &after_open[close + INLINE_CLOSE.len()..];

        if let Some(end) = rest.find(INLINE_TAIL_END) {
            let next_open = rest.find(INLINE_OPEN);
            if next_open.map(|n| end < n).unwrap_or(true) {
                rest = &rest[end + INLINE_TAIL_END.len()..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_text_and_toggles() {
        assert_eq!(classify_line("int x = 1;").unwrap(), LineKind::Text);
        assert_eq!(classify_line("// plain comment").unwrap(), LineKind::Text);
        assert_eq!(
            classify_line("    //$int y;").unwrap(),
            LineKind::Toggle {
                indent: "    ",
                body: "int y;",
                raw: false,
            }
        );
        assert_eq!(
            classify_line("\t//$$ /*$X$*/").unwrap(),
            LineKind::Toggle {
                indent: "\t",
                body: " /*$X$*/",
                raw: true,
            }
        );
    }

    #[test]
    fn test_parse_conditionals() {
        assert_eq!(parse_directive("if DEBUG && X > 1").unwrap(), Directive::If("DEBUG && X > 1"));
        assert_eq!(parse_directive("ifdef DEBUG").unwrap(), Directive::IfDef("DEBUG"));
        assert_eq!(parse_directive("ifndef a.b").unwrap(), Directive::IfNDef("a.b"));
        assert_eq!(parse_directive("elif true").unwrap(), Directive::Elif("true"));
        assert_eq!(parse_directive("else").unwrap(), Directive::Else);
        assert_eq!(parse_directive("endif  ").unwrap(), Directive::EndIf);
        assert!(parse_directive("if").is_err());
        assert!(parse_directive("endif junk").is_err());
        assert!(parse_directive("ifdef A B").is_err());
    }

    #[test]
    fn test_parse_define() {
        assert_eq!(
            parse_directive("define DEBUG").unwrap(),
            Directive::Define {
                name: "DEBUG",
                expr: None,
            }
        );
        assert_eq!(
            parse_directive("define LEVEL=2 + 1").unwrap(),
            Directive::Define {
                name: "LEVEL",
                expr: Some("2 + 1"),
            }
        );
        assert_eq!(
            parse_directive("global app.name = \"demo\"").unwrap(),
            Directive::Global {
                name: "app.name",
                expr: Some("\"demo\""),
            }
        );
        assert!(parse_directive("define 1X").is_err());
        assert!(parse_directive("define X 1").is_err());
        assert!(parse_directive("define X =").is_err());
        assert!(parse_directive("define X == 1").is_err());
    }

    #[test]
    fn test_parse_special_forms() {
        assert_eq!(parse_directive("-").unwrap(), Directive::OutputOff);
        assert_eq!(parse_directive("+").unwrap(), Directive::OutputOn);
        assert_eq!(parse_directive("//").unwrap(), Directive::CommentNext);
        assert_eq!(parse_directive("region foo").unwrap(), Directive::Unknown("region foo"));
        assert_eq!(parse_directive("if(x)").unwrap(), Directive::Unknown("if(x)"));
        assert_eq!(
            parse_directive("include \"common.inc\"").unwrap(),
            Directive::Include("\"common.inc\"")
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(parse_directive("IF x").unwrap(), Directive::Unknown("IF x"));
    }

    #[test]
    fn test_substitute_inline_with_tail() {
        let result = substitute_inline("int v = /*$LEVEL$*/1/*-*/;", |expr| {
            assert_eq!(expr, "LEVEL");
            Ok("42".to_string())
        })
        .unwrap();
        assert_eq!(result, "int v = 42;");
    }

    #[test]
    fn test_substitute_inline_without_tail() {
        let result = substitute_inline("a /*$ X $*/ b /*$Y$*/", |expr| Ok(format!("<{}>", expr))).unwrap();
        assert_eq!(result, "a <X> b <Y>");
    }

    #[test]
    fn test_substitute_inline_tail_does_not_cross_next_marker() {
        let result = substitute_inline("/*$A$*/x /*$B$*/y/*-*/z", |expr| Ok(expr.to_lowercase())).unwrap();
        assert_eq!(result, "ax bz");
    }

    #[test]
    fn test_substitute_inline_unterminated() {
        assert!(substitute_inline("a /*$ X", |_| Ok(String::new())).is_err());
    }
}
