use encoding_rs::{EUC_KR, UTF_16BE, UTF_16LE};

/// A decoded text payload together with the encoding that produced it.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
}

/// Decode raw TXT/MD bytes into UTF-8 prose.
///
/// Detection order: BOM sniffing, strict UTF-8 validation, EUC-KR (the
/// dominant legacy encoding for Korean plain text), then lossy UTF-8 as the
/// last resort so an upload never fails on a stray byte.
pub fn decode_text_bytes(bytes: &[u8]) -> DecodedText {
    if let Some(stripped) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return DecodedText {
            text: String::from_utf8_lossy(stripped).into_owned(),
            encoding: "utf-8",
        };
    }

    if bytes.starts_with(&[0xFF, 0xFE]) {
        let (text, _, _) = UTF_16LE.decode(bytes);
        return DecodedText {
            text: text.into_owned(),
            encoding: "utf-16le",
        };
    }

    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _, _) = UTF_16BE.decode(bytes);
        return DecodedText {
            text: text.into_owned(),
            encoding: "utf-16be",
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding: "utf-8",
        };
    }

    let (text, _, had_errors) = EUC_KR.decode(bytes);
    if !had_errors {
        return DecodedText {
            text: text.into_owned(),
            encoding: "euc-kr",
        };
    }

    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: "utf-8",
    }
}
