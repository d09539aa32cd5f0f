use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use tiktoken_rs::{cl100k_base, CoreBPE};

pub const DEFAULT_CHUNK_TOKENS: usize = 800;
pub const DEFAULT_OVERLAP_TOKENS: usize = 120;

/// One token-bounded span of prose with its provenance in the token stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_tok: usize,
    pub end_tok: usize,
}

/// Split prose into overlapping token windows.
///
/// Windows are `[start, min(start + max_tokens, n))` with `start` advancing
/// by `max_tokens - overlap`. Slices that decode to whitespace are dropped.
/// A window end that lands inside a multi-byte character is extended until
/// the slice decodes.
pub fn chunk(text: &str, max_tokens: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    if max_tokens == 0 {
        return Err(anyhow!("chunk size must be at least one token"));
    }
    if overlap >= max_tokens {
        return Err(anyhow!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({max_tokens})"
        ));
    }

    let tokenizer = tokenizer();
    let tokens = tokenizer.encode_ordinary(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let step = max_tokens - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < tokens.len() {
        let mut end = usize::min(start + max_tokens, tokens.len());
        let mut decoded_chunk: Option<String> = None;

        while end <= tokens.len() {
            match tokenizer.decode(tokens[start..end].to_vec()) {
                Ok(decoded) => {
                    decoded_chunk = Some(decoded);
                    break;
                }
                Err(_) if end < tokens.len() => {
                    // Extend until the slice ends on a valid UTF-8 boundary.
                    end += 1;
                }
                Err(_) => break,
            }
        }

        if let Some(decoded) = decoded_chunk {
            let trimmed = decoded.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    start_tok: start,
                    end_tok: end,
                });
            }
        }

        if end >= tokens.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

fn tokenizer() -> &'static CoreBPE {
    static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();
    TOKENIZER.get_or_init(|| cl100k_base().expect("failed to initialize cl100k tokenizer"))
}

#[cfg(test)]
mod tests {
    use super::{chunk, tokenizer};

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        assert!(chunk("text", 10, 10).is_err());
        assert!(chunk("text", 10, 12).is_err());
        assert!(chunk("text", 0, 0).is_err());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk("", 10, 2).expect("empty text should chunk");
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_fits_in_a_single_chunk() {
        let chunks = chunk("a small document", 100, 10).expect("should chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a small document");
        assert_eq!(chunks[0].start_tok, 0);
    }

    #[test]
    fn without_overlap_chunks_cover_the_whole_token_stream() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let total = tokenizer().encode_ordinary(text).len();

        let chunks = chunk(text, 4, 0).expect("should chunk");
        assert!(chunks.len() > 1);
        assert_eq!(chunks.first().unwrap().start_tok, 0);
        assert_eq!(chunks.last().unwrap().end_tok, total);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_tok, pair[1].start_tok, "windows must be contiguous");
        }
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn overlapping_windows_advance_by_size_minus_overlap() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunk(text, 5, 2).expect("should chunk");

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_tok - pair[0].start_tok, 3);
        }
    }

    #[test]
    fn korean_text_chunks_without_replacement_characters() {
        let text = "검색 증강 생성은 외부 문서를 찾아 답변 근거로 사용한다. ".repeat(60);
        let chunks = chunk(&text, 32, 8).expect("should chunk");

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.text.contains('\u{FFFD}')));
    }
}
