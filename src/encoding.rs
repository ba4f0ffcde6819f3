use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Character encodings supported for source and destination files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "iso-8859-1", alias = "latin1", alias = "ISO-8859-1")]
    Latin1,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Latin1 => write!(f, "iso-8859-1"),
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            other => Err(format!("unsupported encoding '{}'", other)),
        }
    }
}

/// Decoded file text plus whether a UTF-8 byte order mark was present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub had_bom: bool,
}

impl Encoding {
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedText, String> {
        match self {
            Encoding::Utf8 => {
                let (body, had_bom) = match bytes.strip_prefix(UTF8_BOM) {
                    Some(rest) => (rest, true),
                    None => (bytes, false),
                };
                let text = std::str::from_utf8(body)
                    .map_err(|e| format!("invalid utf-8 at byte {}", e.valid_up_to()))?
                    .to_string();
                Ok(DecodedText { text, had_bom })
            }
            Encoding::Latin1 => Ok(DecodedText {
                text: bytes.iter().map(|&b| b as char).collect(),
                had_bom: false,
            }),
        }
    }

    /// Encode text; `bom` is honored for UTF-8 only
    pub fn encode(&self, text: &str, bom: bool) -> Result<Vec<u8>, String> {
        match self {
            Encoding::Utf8 => {
                let mut bytes = Vec::with_capacity(text.len() + 3);
                if bom {
                    bytes.extend_from_slice(UTF8_BOM);
                }
                bytes.extend_from_slice(text.as_bytes());
                Ok(bytes)
            }
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| format!("character '{}' cannot be encoded as iso-8859-1", c))
                })
                .collect(),
        }
    }
}
