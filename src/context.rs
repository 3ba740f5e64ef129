//! Context assembly for generation.
//!
//! Turns ranked [`QueryResult`]s into one citation-tagged block of text that
//! fits a character budget:
//!
//! ```text
//! [1] handbook.md (chars 0-1000)
//! <chunk text>
//!
//! [2] faq.txt (chars 800-1800)
//! <chunk text>
//! ```
//!
//! Chunks are taken whole in rank order; the first one that would push the
//! rendered text past `max_context_size` characters ends assembly. Overlapping
//! windows from the same document are kept as-is.

use serde::Serialize;

use crate::models::QueryResult;

const SEPARATOR: &str = "\n\n";

/// One chunk included in an assembled context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    /// Citation number used in the rendered text.
    pub citation: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Rendered context plus the entries it cites.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalContext {
    pub entries: Vec<ContextEntry>,
    pub text: String,
    /// Length of `text` in characters.
    pub size: usize,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Assemble `results` (in rank order) into a context of at most
/// `max_context_size` characters.
pub fn assemble(results: &[QueryResult], max_context_size: usize) -> RetrievalContext {
    let mut ctx = RetrievalContext::default();

    for result in results {
        let citation = ctx.entries.len() + 1;
        let block = render_block(citation, result);
        let sep = if ctx.text.is_empty() { "" } else { SEPARATOR };
        let added = sep.chars().count() + block.chars().count();

        if ctx.size + added > max_context_size {
            break;
        }

        ctx.text.push_str(sep);
        ctx.text.push_str(&block);
        ctx.size += added;
        ctx.entries.push(ContextEntry {
            citation,
            chunk_id: result.chunk_id.clone(),
            document_id: result.document_id.clone(),
            filename: result.filename.clone(),
            start: result.start,
            end: result.end,
            score: result.score,
        });
    }

    ctx
}

fn render_block(citation: usize, result: &QueryResult) -> String {
    format!(
        "[{}] {} (chars {}-{})\n{}",
        citation, result.filename, result.start, result.end, result.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SourceType;

    fn result(rank: usize, filename: &str, start: usize, text: &str) -> QueryResult {
        QueryResult {
            chunk_id: format!("chunk-{}", rank),
            score: 1.0 - rank as f32 * 0.1,
            rank,
            document_id: format!("doc-{}", filename),
            filename: filename.to_string(),
            source_type: SourceType::Text,
            chunk_index: rank as i64 - 1,
            start,
            end: start + text.chars().count(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_renders_citations() {
        let results = vec![result(1, "a.txt", 0, "hello"), result(2, "b.md", 80, "world")];
        let ctx = assemble(&results, 1000);
        assert_eq!(
            ctx.text,
            "[1] a.txt (chars 0-5)\nhello\n\n[2] b.md (chars 80-85)\nworld"
        );
        assert_eq!(ctx.size, ctx.text.chars().count());
        assert_eq!(ctx.entries.len(), 2);
        assert_eq!(ctx.entries[1].document_id, "doc-b.md");
        assert_eq!(ctx.entries[1].start, 80);
    }

    #[test]
    fn test_stops_at_first_chunk_over_budget() {
        let long = "x".repeat(500);
        let results = vec![
            result(1, "a.txt", 0, "short"),
            result(2, "b.txt", 0, &long),
            result(3, "c.txt", 0, "tiny"),
        ];
        let ctx = assemble(&results, 100);
        assert_eq!(ctx.entries.len(), 1);
        assert!(!ctx.text.contains("tiny"));
        assert!(ctx.size <= 100);
    }

    #[test]
    fn test_never_truncates_a_chunk() {
        let results = vec![result(1, "a.txt", 0, &"y".repeat(50))];
        let ctx = assemble(&results, 40);
        assert!(ctx.is_empty());
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.size, 0);
    }

    #[test]
    fn test_budget_counts_separator_and_tags() {
        let results = vec![result(1, "a.txt", 0, "hello"), result(2, "a.txt", 3, "lo wo")];
        let first_len = "[1] a.txt (chars 0-5)\nhello".chars().count();
        let second_len = "[2] a.txt (chars 3-8)\nlo wo".chars().count();

        let exact = assemble(&results, first_len + 2 + second_len);
        assert_eq!(exact.entries.len(), 2);
        assert_eq!(exact.size, first_len + 2 + second_len);

        let short = assemble(&results, first_len + 2 + second_len - 1);
        assert_eq!(short.entries.len(), 1);
    }

    #[test]
    fn test_multibyte_counted_in_chars() {
        let results = vec![result(1, "j.txt", 0, "日本語")];
        let ctx = assemble(&results, 1000);
        assert_eq!(ctx.size, ctx.text.chars().count());
        assert!(ctx.size < ctx.text.len());
    }
}
