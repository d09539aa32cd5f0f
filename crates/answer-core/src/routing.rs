use std::sync::OnceLock;

use doc_store::SearchHit;
use regex::Regex;

/// Greetings, thanks, goodbyes, self-introduction and help requests in
/// Korean and English. Matching questions skip retrieval entirely.
fn smalltalk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)^\s*(
                안녕 | 하이 | 헬로 | ㅎㅇ | 반갑 | 반가워 |
                고마워 | 고맙 | 감사 | 수고 |
                잘\s*가 | 바이 | 또\s*봐 |
                누구\s*(야|니|세요|신가요) | 너는\s*누구 | 넌\s*누구 | 자기\s*소개 |
                도움말 | 도와\s*줘 | 뭘\s*할\s*수\s*있 | 무엇을\s*할\s*수\s*있 |
                hi | hello | hey | yo |
                thanks | thank\s*you | thx |
                bye | goodbye | see\s*you |
                who\s*are\s*you | introduce\s*yourself | help
            )",
        )
        .expect("smalltalk pattern must compile")
    })
}

/// Lexical cues that a document question targets table figures. A match
/// routes straight to the table regime without asking the classifier model.
fn table_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)(
                표에서 | 표의 | 표를 | 표\s*안 | 테이블 |
                행별 | 열별 | 컬럼 | 셀\s*값 |
                합계 | 총계 | 평균 | 최대값 | 최댓값 | 최소값 | 최솟값 |
                수치 | 통계 | 집계 |
                몇\s*(개|명|건|원|%|퍼센트) |
                table | column | row\s+of | cell | sum\s+of | average | total
            )",
        )
        .expect("table keyword pattern must compile")
    })
}

pub fn is_smalltalk(question: &str) -> bool {
    smalltalk_pattern().is_match(question)
}

pub fn matches_table_keywords(question: &str) -> bool {
    table_keyword_pattern().is_match(question)
}

/// The merged view over the per-type retrieval slices.
#[derive(Debug, Clone, Default)]
pub struct RetrievalSummary {
    pub hits: Vec<SearchHit>,
    pub max_sim: f32,
    pub top3_avg: f32,
}

/// Union the slices preserving per-slice order, dropping duplicate ids,
/// and derive the confidence statistics: the best similarity and the mean
/// of the three best (0 when fewer than three survive).
pub fn merge_slices(slices: Vec<Vec<SearchHit>>) -> RetrievalSummary {
    let mut seen = std::collections::HashSet::new();
    let mut hits: Vec<SearchHit> = Vec::new();

    for slice in slices {
        for hit in slice {
            if seen.insert(hit.id) {
                hits.push(hit);
            }
        }
    }

    let max_sim = hits.iter().map(|hit| hit.sim).fold(0.0f32, f32::max);

    let top3_avg = if hits.len() < 3 {
        0.0
    } else {
        let mut sims: Vec<f32> = hits.iter().map(|hit| hit.sim).collect();
        sims.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        (sims[0] + sims[1] + sims[2]) / 3.0
    };

    RetrievalSummary {
        hits,
        max_sim,
        top3_avg,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Document,
    General,
}

/// The confidence gate: document mode when the best hit is strong enough
/// or the top three agree well enough, general mode otherwise.
pub fn choose_route(summary: &RetrievalSummary, use_as_ctx_min: f32, min_top3_avg: f32) -> Route {
    if summary.max_sim >= use_as_ctx_min || summary.top3_avg >= min_top3_avg {
        Route::Document
    } else {
        Route::General
    }
}
