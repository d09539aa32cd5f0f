use std::sync::OnceLock;

use regex::Regex;

/// The loosely-shaped table payload an extractor hands back. Every field is
/// optional; `normalize_table` picks the richest representation available.
#[derive(Debug, Clone, Default)]
pub struct TableShape {
    pub html: Option<String>,
    pub header: Option<Vec<String>>,
    pub rows: Option<Vec<Vec<String>>>,
    pub preview_rows: Option<Vec<Vec<String>>>,
    pub n_rows: Option<usize>,
    pub n_cols: Option<usize>,
}

/// A table reduced to one canonical shape with derived renderings.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub tsv: String,
    pub md: String,
    pub html: String,
    pub n_rows: usize,
    pub n_cols: usize,
}

/// Markdown rendering keeps at most this many data rows; the full table
/// lives in the TSV and HTML forms.
const MD_MAX_DATA_ROWS: usize = 30;

/// Reduce an extractor table to `{header, rows}` plus TSV/Markdown/HTML.
///
/// Preference order: an HTML body (first `<tr>` is the header), explicit
/// `rows`/`header` (a missing header is synthesized as `col_1, col_2, …`),
/// then `preview_rows`. Returns `None` when no representation yields cells.
pub fn normalize_table(shape: &TableShape) -> Option<NormalizedTable> {
    if let Some(html) = shape.html.as_deref() {
        let mut parsed = parse_html_rows(html);
        if !parsed.is_empty() {
            let header = parsed.remove(0);
            return Some(build(header, parsed, shape));
        }
    }

    if let Some(rows) = shape.rows.as_ref().filter(|rows| !rows.is_empty()) {
        let header = match shape.header.as_ref().filter(|h| !h.is_empty()) {
            Some(header) => header.clone(),
            None => synthesize_header(rows[0].len()),
        };
        return Some(build(header, rows.clone(), shape));
    }

    if let Some(preview) = shape.preview_rows.as_ref().filter(|rows| !rows.is_empty()) {
        let mut rows = preview.clone();
        let header = rows.remove(0);
        return Some(build(header, rows, shape));
    }

    None
}

fn build(header: Vec<String>, rows: Vec<Vec<String>>, shape: &TableShape) -> NormalizedTable {
    let n_rows = if rows.is_empty() {
        shape.n_rows.unwrap_or(0)
    } else {
        rows.len()
    };
    let n_cols = if header.is_empty() {
        shape.n_cols.unwrap_or(0)
    } else {
        header.len()
    };

    let tsv = render_tsv(&header, &rows);
    let md = render_markdown(&header, &rows);
    let html = shape
        .html
        .clone()
        .unwrap_or_else(|| render_html(&header, &rows));

    NormalizedTable {
        header,
        rows,
        tsv,
        md,
        html,
        n_rows,
        n_cols,
    }
}

fn synthesize_header(width: usize) -> Vec<String> {
    (1..=width).map(|index| format!("col_{index}")).collect()
}

fn parse_html_rows(html: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();

    for row_capture in tr_pattern().captures_iter(html) {
        let body = row_capture.get(1).map(|m| m.as_str()).unwrap_or_default();
        let cells: Vec<String> = cell_pattern()
            .captures_iter(body)
            .map(|cell| strip_markup(cell.get(1).map(|m| m.as_str()).unwrap_or_default()))
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    rows
}

fn strip_markup(cell: &str) -> String {
    let without_tags = tag_pattern().replace_all(cell, " ");
    let unescaped = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_tsv(header: &[String], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(tsv_line(header));
    for row in rows {
        lines.push(tsv_line(row));
    }
    lines.join("\n")
}

fn tsv_line(cells: &[String]) -> String {
    cells
        .iter()
        .map(|cell| cell.replace(['\t', '\n'], " "))
        .collect::<Vec<_>>()
        .join("\t")
}

fn render_markdown(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str(&md_line(header));
    out.push('\n');
    out.push_str(&md_separator(header.len()));

    for row in rows.iter().take(MD_MAX_DATA_ROWS) {
        out.push('\n');
        out.push_str(&md_line(row));
    }

    out
}

fn md_line(cells: &[String]) -> String {
    let mut line = String::from("|");
    for cell in cells {
        line.push(' ');
        line.push_str(&cell.replace('|', "\\|").replace('\n', " "));
        line.push_str(" |");
    }
    line
}

fn md_separator(width: usize) -> String {
    let mut line = String::from("|");
    for _ in 0..width.max(1) {
        line.push_str(" --- |");
    }
    line
}

fn render_html(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::from("<table><tr>");
    for cell in header {
        out.push_str("<th>");
        out.push_str(&escape_html(cell));
        out.push_str("</th>");
    }
    out.push_str("</tr>");

    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str("<td>");
            out.push_str(&escape_html(cell));
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }

    out.push_str("</table>");
    out
}

fn escape_html(cell: &str) -> String {
    cell.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn tr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("tr pattern must compile")
    })
}

fn cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").expect("cell pattern must compile")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern must compile"))
}

#[cfg(test)]
mod tests {
    use super::{normalize_table, TableShape};

    #[test]
    fn html_table_uses_first_row_as_header() {
        let shape = TableShape {
            html: Some(
                "<table><tr><th>연도</th><th>매출</th></tr>\
                 <tr><td>2022</td><td>100</td></tr>\
                 <tr><td>2023</td><td>150</td></tr></table>"
                    .to_string(),
            ),
            ..TableShape::default()
        };

        let table = normalize_table(&shape).expect("html table should normalize");
        assert_eq!(table.header, vec!["연도", "매출"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["2022", "100"]);
        assert_eq!(table.n_rows, 2);
        assert_eq!(table.n_cols, 2);
        assert!(table.tsv.starts_with("연도\t매출"));
    }

    #[test]
    fn rows_without_header_get_synthesized_columns() {
        let shape = TableShape {
            rows: Some(vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
            ]),
            ..TableShape::default()
        };

        let table = normalize_table(&shape).expect("rows should normalize");
        assert_eq!(table.header, vec!["col_1", "col_2"]);
        assert!(table.html.contains("<th>col_1</th>"));
    }

    #[test]
    fn preview_rows_promote_first_row_to_header() {
        let shape = TableShape {
            preview_rows: Some(vec![
                vec!["name".to_string(), "value".to_string()],
                vec!["x".to_string(), "1".to_string()],
            ]),
            ..TableShape::default()
        };

        let table = normalize_table(&shape).expect("preview rows should normalize");
        assert_eq!(table.header, vec!["name", "value"]);
        assert_eq!(table.rows, vec![vec!["x".to_string(), "1".to_string()]]);
    }

    #[test]
    fn markdown_truncates_after_thirty_data_rows() {
        let rows: Vec<Vec<String>> = (0..40).map(|i| vec![format!("row{i}")]).collect();
        let shape = TableShape {
            header: Some(vec!["h".to_string()]),
            rows: Some(rows),
            ..TableShape::default()
        };

        let table = normalize_table(&shape).expect("rows should normalize");
        assert_eq!(table.md.lines().count(), 2 + 30);
        assert_eq!(table.rows.len(), 40, "tsv/rows keep the full table");
        assert_eq!(table.tsv.lines().count(), 41);
    }

    #[test]
    fn empty_shape_yields_none() {
        assert!(normalize_table(&TableShape::default()).is_none());
    }

    #[test]
    fn nested_markup_inside_cells_is_stripped() {
        let shape = TableShape {
            html: Some(
                "<table><tr><th><b>이름</b></th></tr><tr><td><span>값&amp;예</span></td></tr></table>"
                    .to_string(),
            ),
            ..TableShape::default()
        };

        let table = normalize_table(&shape).expect("html should normalize");
        assert_eq!(table.header, vec!["이름"]);
        assert_eq!(table.rows[0], vec!["값&예"]);
    }
}
