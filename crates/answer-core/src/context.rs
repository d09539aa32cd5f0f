use doc_store::SearchHit;
use serde::Serialize;

/// A document reference returned alongside the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub sim: f32,
}

/// Fragments longer than the per-fragment budget collapse their middle:
/// the first and last halves survive around an ellipsis line.
fn trim_middle(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let half = max_chars / 2;
    let head: String = content.chars().take(half).collect();
    let tail: String = content
        .chars()
        .skip(total.saturating_sub(half))
        .collect();

    format!("{head}...\n{tail}")
}

/// Build the prompt context from ranked hits, trimming each fragment and
/// stopping once the character budget is spent. Sources are collected in
/// the same pass, one entry per (filename, page).
pub fn compose_context(
    hits: &[SearchHit],
    max_ctx_chars: usize,
    trim_chars: usize,
) -> (String, Vec<SourceRef>) {
    let mut context = String::new();
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut used_chars = 0usize;

    for hit in hits {
        let body = trim_middle(&hit.content, trim_chars);
        let body_chars = body.chars().count();
        if used_chars > 0 && used_chars + body_chars > max_ctx_chars {
            break;
        }

        let filename = hit
            .meta
            .filepath
            .clone()
            .or_else(|| hit.meta.stored_path.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let kind = hit.meta.kind.map(|k| k.as_str().to_string()).unwrap_or_default();
        let page = hit
            .meta
            .page
            .map(|p| p.to_string())
            .unwrap_or_default();

        context.push_str(&format!(
            "<document source=\"{filename}\" page=\"{page}\" type=\"{kind}\">\n{body}\n</document>\n"
        ));
        used_chars += body_chars;

        let already_listed = sources
            .iter()
            .any(|source| source.filename == filename && source.page == hit.meta.page);
        if !already_listed {
            sources.push(SourceRef {
                filename,
                page: hit.meta.page,
                kind,
                sim: (hit.sim * 10_000.0).round() / 10_000.0,
            });
        }
    }

    (context, sources)
}

#[cfg(test)]
mod tests {
    use doc_store::{FragmentKind, FragmentMeta, SearchHit};

    use super::{compose_context, trim_middle};

    fn hit_with(filename: &str, page: Option<i64>, content: &str, sim: f32) -> SearchHit {
        let mut meta = FragmentMeta::of_kind(FragmentKind::Pdf);
        meta.filepath = Some(filename.to_string());
        meta.page = page;
        SearchHit {
            id: 0,
            meta,
            sim,
            content: content.to_string(),
        }
    }

    #[test]
    fn short_fragments_pass_through_untouched() {
        assert_eq!(trim_middle("짧은 내용", 1600), "짧은 내용");
    }

    #[test]
    fn long_fragments_collapse_their_middle() {
        let content = "a".repeat(1000) + &"z".repeat(1000);
        let trimmed = trim_middle(&content, 1600);

        assert!(trimmed.starts_with(&"a".repeat(800)));
        assert!(trimmed.ends_with(&"z".repeat(800)));
        assert!(trimmed.contains("...\n"));
        assert_eq!(trimmed.chars().count(), 1600 + "...\n".chars().count());
    }

    #[test]
    fn trim_respects_multibyte_boundaries() {
        let content = "한".repeat(2000);
        let trimmed = trim_middle(&content, 1600);
        assert!(!trimmed.contains('\u{FFFD}'));
        assert!(trimmed.starts_with('한'));
        assert!(trimmed.ends_with('한'));
    }

    #[test]
    fn context_blocks_carry_source_page_and_type() {
        let (context, sources) =
            compose_context(&[hit_with("a.pdf", Some(3), "본문 내용", 0.91234)], 4000, 1600);

        assert!(context.contains("<document source=\"a.pdf\" page=\"3\" type=\"pdf\">"));
        assert!(context.contains("본문 내용"));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].filename, "a.pdf");
        assert_eq!(sources[0].page, Some(3));
        assert_eq!(sources[0].sim, 0.9123);
    }

    #[test]
    fn budget_stops_accumulation_but_keeps_the_first_fragment() {
        let hits = vec![
            hit_with("a.pdf", Some(1), &"가".repeat(900), 0.9),
            hit_with("b.pdf", Some(1), &"나".repeat(900), 0.8),
            hit_with("c.pdf", Some(1), &"다".repeat(900), 0.7),
        ];

        let (context, sources) = compose_context(&hits, 2000, 1600);
        assert!(context.contains("a.pdf"));
        assert!(context.contains("b.pdf"));
        assert!(!context.contains("c.pdf"), "third fragment exceeds the budget");
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn duplicate_file_and_page_pairs_collapse_into_one_source() {
        let hits = vec![
            hit_with("a.pdf", Some(1), "첫 번째", 0.9),
            hit_with("a.pdf", Some(1), "두 번째", 0.8),
            hit_with("a.pdf", Some(2), "세 번째", 0.7),
        ];

        let (_, sources) = compose_context(&hits, 4000, 1600);
        assert_eq!(sources.len(), 2);
    }
}
