//! Plain-text card dump interchange format
//!
//! The format is consumed by external tooling that parses it byte-for-byte:
//! header lines first, then one `Block N: ...` line per block with sixteen
//! two-digit uppercase hex tokens, `??` standing in for bytes that were never
//! read. No blank lines anywhere, no lowercase hex, no unpadded tokens.
//! Both the writer and the parser enforce the rules exactly; a relaxed parser
//! would happily accept files other consumers reject.

use thiserror::Error;

use crate::card::{CardImage, CardLayout, BLOCK_SIZE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DumpError {
    #[error("blank line at {line}: the format forbids blank lines")]
    BlankLine { line: usize },
    #[error("malformed block line at {line}")]
    MalformedBlockLine { line: usize },
    #[error("invalid byte token {token:?} at line {line}")]
    InvalidByteToken { line: usize, token: String },
    #[error("header line at {line} after the first block line")]
    HeaderAfterBlocks { line: usize },
    #[error("block {index} repeated at line {line}")]
    DuplicateBlock { index: usize, line: usize },
    #[error("block index {index} beyond any supported layout")]
    UnsupportedBlockIndex { index: usize },
    #[error("no block lines found")]
    NoBlocks,
}

/// A parsed dump: preserved header lines plus the card image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDump {
    pub headers: Vec<String>,
    pub image: CardImage,
}

impl CardDump {
    /// Wrap an image with the standard header set for its layout.
    pub fn with_standard_headers(image: CardImage) -> CardDump {
        let type_name = match image.layout() {
            CardLayout::Classic1k => "1K",
            CardLayout::Classic4k => "4K",
        };
        let uid = image
            .uid
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let headers = vec![
            "Filetype: Flipper NFC device".to_string(),
            "Version: 3".to_string(),
            "Device type: MIFARE Classic".to_string(),
            format!("UID: {uid}"),
            "ATQA: 00 04".to_string(),
            "SAK: 08".to_string(),
            format!("Mifare Classic type: {type_name}"),
            "Data format version: 2".to_string(),
        ];
        CardDump { headers, image }
    }

    /// Parse dump text. Strict by design; see the module docs.
    pub fn parse(text: &str) -> Result<CardDump, DumpError> {
        let mut headers = Vec::new();
        // (index, data, readable)
        let mut parsed: Vec<(usize, [u8; BLOCK_SIZE], bool)> = Vec::new();

        for (n, line) in text.lines().enumerate() {
            let line_no = n + 1;
            if line.trim().is_empty() {
                return Err(DumpError::BlankLine { line: line_no });
            }

            if let Some(rest) = line.strip_prefix("Block ") {
                let (index, tokens) = rest
                    .split_once(':')
                    .ok_or(DumpError::MalformedBlockLine { line: line_no })?;
                let index: usize = index
                    .trim()
                    .parse()
                    .map_err(|_| DumpError::MalformedBlockLine { line: line_no })?;
                if index >= 256 {
                    return Err(DumpError::UnsupportedBlockIndex { index });
                }
                if parsed.iter().any(|(i, _, _)| *i == index) {
                    return Err(DumpError::DuplicateBlock { index, line: line_no });
                }

                let tokens: Vec<&str> = tokens.split_whitespace().collect();
                if tokens.len() != BLOCK_SIZE {
                    return Err(DumpError::MalformedBlockLine { line: line_no });
                }

                let mut data = [0u8; BLOCK_SIZE];
                let mut readable = true;
                for (i, token) in tokens.iter().enumerate() {
                    if *token == "??" {
                        readable = false;
                        continue;
                    }
                    data[i] = parse_byte_token(token).ok_or_else(|| {
                        DumpError::InvalidByteToken {
                            line: line_no,
                            token: (*token).to_string(),
                        }
                    })?;
                }
                parsed.push((index, data, readable));
            } else {
                if !parsed.is_empty() {
                    return Err(DumpError::HeaderAfterBlocks { line: line_no });
                }
                headers.push(line.to_string());
            }
        }

        let max_block = parsed
            .iter()
            .map(|(i, _, _)| *i)
            .max()
            .ok_or(DumpError::NoBlocks)?;
        let layout = CardLayout::for_max_block(max_block)
            .ok_or(DumpError::UnsupportedBlockIndex { index: max_block })?;

        let uid = uid_from_headers(&headers)
            .or_else(|| {
                parsed
                    .iter()
                    .find(|(i, _, readable)| *i == 0 && *readable)
                    .map(|(_, data, _)| data[0..4].to_vec())
            })
            .unwrap_or_default();

        let mut image = CardImage::new(uid, layout);
        for (index, data, readable) in parsed {
            if readable {
                image.set_block(index, data).expect("index checked above");
            }
        }

        Ok(CardDump { headers, image })
    }

    /// Serialize to the interchange format. Blocks never read are emitted as
    /// sixteen `??` tokens.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for header in &self.headers {
            out.push_str(header);
            out.push('\n');
        }
        for block in self.image.blocks() {
            out.push_str(&format!("Block {}: ", block.index));
            if block.readable {
                let tokens: Vec<String> =
                    block.data.iter().map(|b| format!("{b:02X}")).collect();
                out.push_str(&tokens.join(" "));
            } else {
                out.push_str(&vec!["??"; BLOCK_SIZE].join(" "));
            }
            out.push('\n');
        }
        out
    }
}

/// Accept only two uppercase hex digits.
fn parse_byte_token(token: &str) -> Option<u8> {
    let bytes = token.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
    {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

fn uid_from_headers(headers: &[String]) -> Option<Vec<u8>> {
    let line = headers.iter().find(|h| h.starts_with("UID:"))?;
    let tokens: Vec<&str> = line["UID:".len()..].split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    tokens.iter().map(|t| parse_byte_token(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        let mut image = CardImage::new(vec![0x2B, 0xB9, 0x91, 0xB5], CardLayout::Classic1k);
        image
            .set_block(0, [
                0x2B, 0xB9, 0x91, 0xB5, 0xB6, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ])
            .unwrap();
        image
            .set_block(4, crate::value::ValueBlock::encode_split16(900, 2))
            .unwrap();
        CardDump::with_standard_headers(image).serialize()
    }

    #[test]
    fn serialized_form_is_strict() {
        let text = sample_text();
        assert!(!text.contains("\n\n"));
        assert!(text.contains("Block 4: 84 03 02 00 7B FC FD FF 84 03 02 00 04 FB 04 FB\n"));
        // Unreadable blocks keep their markers
        assert!(text.contains("Block 5: ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ??\n"));
        for line in text.lines().filter(|l| l.starts_with("Block")) {
            assert_eq!(line.to_ascii_uppercase().as_str(), line);
        }
    }

    #[test]
    fn parse_round_trips_readable_blocks() {
        let text = sample_text();
        let dump = CardDump::parse(&text).unwrap();
        assert_eq!(dump.image.uid, vec![0x2B, 0xB9, 0x91, 0xB5]);
        assert!(dump.image.block(4).unwrap().readable);
        assert!(!dump.image.block(5).unwrap().readable);
        assert_eq!(dump.serialize(), text);
    }

    #[test]
    fn blank_line_rejected() {
        let text = sample_text().replacen("Block 1:", "\nBlock 1:", 1);
        assert!(matches!(
            CardDump::parse(&text),
            Err(DumpError::BlankLine { .. })
        ));
    }

    #[test]
    fn lowercase_hex_rejected() {
        let text = sample_text().replace("Block 4: 84", "Block 4: 8f");
        assert!(matches!(
            CardDump::parse(&text),
            Err(DumpError::InvalidByteToken { .. })
        ));
    }

    #[test]
    fn unpadded_token_rejected() {
        let text = sample_text().replace("Block 4: 84", "Block 4: 8");
        assert!(matches!(
            CardDump::parse(&text),
            Err(DumpError::InvalidByteToken { .. })
        ));
    }

    #[test]
    fn short_block_line_rejected() {
        let mut text = sample_text();
        text.push_str("Block 70: 00 00\n");
        assert!(matches!(
            CardDump::parse(&text),
            Err(DumpError::MalformedBlockLine { .. })
        ));
    }

    #[test]
    fn header_after_blocks_rejected() {
        let mut text = sample_text();
        text.push_str("SAK: 08\n");
        assert!(matches!(
            CardDump::parse(&text),
            Err(DumpError::HeaderAfterBlocks { .. })
        ));
    }

    #[test]
    fn partial_unknown_block_stays_unreadable() {
        let text = sample_text().replace(
            "Block 4: 84 03",
            "Block 4: ?? 03",
        );
        let dump = CardDump::parse(&text).unwrap();
        assert!(!dump.image.block(4).unwrap().readable);
        // Re-serializing keeps the unknown marker rather than inventing bytes
        assert!(dump
            .serialize()
            .contains("Block 4: ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ??"));
    }

    #[test]
    fn max_block_selects_layout() {
        let mut image = CardImage::new(vec![1, 2, 3, 4], CardLayout::Classic4k);
        image.set_block(255, [0xAB; BLOCK_SIZE]).unwrap();
        let dump = CardDump::with_standard_headers(image);
        let parsed = CardDump::parse(&dump.serialize()).unwrap();
        assert_eq!(parsed.image.layout(), CardLayout::Classic4k);
        assert_eq!(parsed.image.block(255).unwrap().data, [0xAB; BLOCK_SIZE]);
    }
}
