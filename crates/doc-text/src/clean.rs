/// Clean extracted prose before chunking and embedding.
///
/// Expands typographic ligatures PDF extractors leave behind, drops
/// zero-width and soft-hyphen artifacts, folds full-width digits and
/// letters to their ASCII forms, and normalizes line endings. Blank-line
/// runs collapse to a single paragraph break.
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for ch in input.chars() {
        match ch {
            // Latin ligatures from PDF text layers.
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            '\u{FB05}' | '\u{FB06}' => out.push_str("st"),
            // Invisible artifacts.
            '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            '\u{00A0}' => out.push(' '),
            '\r' => {}
            other => out.push(fold_fullwidth(other)),
        }
    }

    collapse_blank_lines(&out)
}

/// Map full-width digits, Latin letters and the numeric punctuation that
/// commonly appears in Korean office documents onto ASCII.
fn fold_fullwidth(ch: char) -> char {
    match ch {
        '０'..='９' => char::from(b'0' + (ch as u32 - '０' as u32) as u8),
        'Ａ'..='Ｚ' => char::from(b'A' + (ch as u32 - 'Ａ' as u32) as u8),
        'ａ'..='ｚ' => char::from(b'a' + (ch as u32 - 'ａ' as u32) as u8),
        '％' => '%',
        '＋' => '+',
        '－' => '-',
        '．' => '.',
        '，' => ',',
        '　' => ' ',
        other => other,
    }
}

fn collapse_blank_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blank_run = 0usize;

    for line in input.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            continue;
        }

        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(trimmed);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::clean_text;

    #[test]
    fn expands_ligatures_and_strips_soft_hyphens() {
        let cleaned = clean_text("ef\u{FB01}cient work\u{00AD}flow");
        assert_eq!(cleaned, "efficient workflow");
    }

    #[test]
    fn folds_fullwidth_digits_to_ascii() {
        let cleaned = clean_text("매출 １２３．４５％ 증가");
        assert_eq!(cleaned, "매출 123.45% 증가");
    }

    #[test]
    fn collapses_blank_line_runs_into_paragraph_breaks() {
        let cleaned = clean_text("first\r\n\r\n\r\n\r\nsecond\r\nthird");
        assert_eq!(cleaned, "first\n\nsecond\nthird");
    }

    #[test]
    fn drops_zero_width_characters() {
        let cleaned = clean_text("한\u{200B}국\u{FEFF}어");
        assert_eq!(cleaned, "한국어");
    }
}
