//! Text utilities shared by the engine and the CLI

/// One physical line: its content and the exact terminator that ended it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub content: &'a str,
    /// `"\n"`, `"\r\n"`, `"\r"`, or `""` for a final line without terminator
    pub terminator: &'a str,
}

/// Split text into lines, keeping each terminator so the input can be
/// reassembled byte for byte.
pub fn split_lines(text: &str) -> Vec<Line<'_>> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(Line {
                    content: &text[start..i],
                    terminator: &text[i..i + 1],
                });
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = if bytes.get(i + 1) == Some(&b'\n') { i + 2 } else { i + 1 };
                lines.push(Line {
                    content: &text[start..i],
                    terminator: &text[i..end],
                });
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < text.len() {
        lines.push(Line {
            content: &text[start..],
            terminator: "",
        });
    }
    lines
}

/// Leading whitespace of a line
pub fn indentation(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Replace the longest matching prefix of every value.
///
/// Prefixes are tried longest first, so with `["-", "--"]` the value `"--a"`
/// loses both dashes. Values without a matching prefix are returned unchanged.
pub fn replace_string_prefix(prefixes: &[&str], replacement: &str, values: &[&str]) -> Vec<String> {
    let mut ordered: Vec<&str> = prefixes.to_vec();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));

    values
        .iter()
        .map(|value| {
            ordered
                .iter()
                .find(|prefix| value.starts_with(**prefix))
                .map(|prefix| format!("{}{}", replacement, &value[prefix.len()..]))
                .unwrap_or_else(|| value.to_string())
        })
        .collect()
}

/// Normalize file extension filters: `*.java`, `.java` and `java` all become `java`
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let values: Vec<&str> = extensions.iter().map(|e| e.trim()).collect();
    replace_string_prefix(&["*.", "."], "", &values)
        .into_iter()
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
        .collect()
}

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
