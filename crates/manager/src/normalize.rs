//! Response normalization: turn oversized string results into a bounded
//! [`ProcessedResponse`] the runtime can consume without blowing its
//! context.
//!
//! Pure functions over `(tool_name, text)`; the invocation wrapper calls
//! [`process_response`] after I/O for any string result at or past
//! [`LARGE_RESPONSE_THRESHOLD`].

use std::sync::LazyLock;

use regex::Regex;

use fleet_domain::tool::{ChunkMetadata, Importance, ProcessedResponse, Section};

/// String results at or above this length get normalized.
pub const LARGE_RESPONSE_THRESHOLD: usize = 5_000;

/// Characters of summary text before ellipsizing.
const SUMMARY_LENGTH: usize = 300;

/// Characters of one heading before ellipsizing.
const HEADING_LENGTH: usize = 100;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static META_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s[^>]*name=["']description["'][^>]*content=["']([^"']*)["']"#)
        .unwrap()
});
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>").unwrap());
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).unwrap());
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<nav[^>]*>.*?</nav>|<footer[^>]*>.*?</footer>|<header[^>]*>.*?</header>",
    )
    .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize one oversized string result. Dispatches on the tool name:
/// fetch-like tools get HTML treatment, search/crawl tools get result-list
/// treatment, everything else gets plain chunking. Never fails — internal
/// errors degrade to a truncated prefix.
pub fn process_response(tool_name: &str, text: &str) -> ProcessedResponse {
    let lowered = tool_name.to_lowercase();
    let result = if lowered.contains("fetch") {
        process_html(tool_name, text)
    } else if lowered.contains("search") || lowered.contains("crawl") {
        process_search(tool_name, text)
    } else {
        process_plain(tool_name, text)
    };
    result.unwrap_or_else(|| truncated(tool_name, text))
}

fn truncated(tool_name: &str, text: &str) -> ProcessedResponse {
    ProcessedResponse::Truncated {
        tool: tool_name.to_string(),
        content: safe_prefix(text, 3_000).to_string(),
        note: "response processing failed; raw prefix shown".to_string(),
        original_length: text.len(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML (fetch-like tools)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn process_html(tool_name: &str, html: &str) -> Option<ProcessedResponse> {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Web Page".to_string());
    let url = URL_RE.find(html).map(|m| m.as_str().to_string());
    let headings: Vec<String> = HEADING_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| collapse_whitespace(&strip_tags(m.as_str())))
        .filter(|h| !h.is_empty())
        .map(|h| ellipsize(&h, HEADING_LENGTH))
        .take(8)
        .collect();
    let meta_description = META_DESCRIPTION_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|d| !d.is_empty());

    let stripped = BLOCK_RE.replace_all(html, " ");
    let content = collapse_whitespace(&strip_tags(&stripped));

    let summary = meta_description
        .clone()
        .unwrap_or_else(|| ellipsize(&content, SUMMARY_LENGTH));

    let mut sections = vec![
        Section {
            title: "Page Title".to_string(),
            content: title.clone(),
            importance: Importance::High,
        },
        Section {
            title: "Summary".to_string(),
            content: summary.clone(),
            importance: Importance::High,
        },
    ];
    if !headings.is_empty() {
        sections.push(Section {
            title: "Key Sections".to_string(),
            content: headings.join(" • "),
            importance: Importance::Medium,
        });
    }
    for (i, chunk) in chunk_text(&content, 2_000).into_iter().take(3).enumerate() {
        sections.push(Section {
            title: format!("Content Part {}", i + 1),
            content: chunk,
            importance: if i == 0 {
                Importance::Medium
            } else {
                Importance::Low
            },
        });
    }
    sections.truncate(5);

    Some(chunked(tool_name, summary, sections, html.len(), url, Some(title)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search / crawl results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn process_search(tool_name: &str, text: &str) -> Option<ProcessedResponse> {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(results) = parsed.get("results").and_then(|r| r.as_array()) {
            let summary = format!("Search returned {} result(s)", results.len());
            let mut sections = vec![Section {
                title: "Summary".to_string(),
                content: summary.clone(),
                importance: Importance::High,
            }];
            for (i, result) in results.iter().take(5).enumerate() {
                let title = result
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Result {}", i + 1));
                let content = ["snippet", "description", "content", "url"]
                    .iter()
                    .find_map(|field| result.get(*field).and_then(|v| v.as_str()))
                    .map(str::to_string)
                    .unwrap_or_else(|| result.to_string());
                sections.push(Section {
                    title,
                    content: ellipsize(&content, 1_500),
                    importance: if i < 2 {
                        Importance::Medium
                    } else {
                        Importance::Low
                    },
                });
            }
            return Some(chunked(tool_name, summary, sections, text.len(), None, None));
        }
    }

    // Not JSON (or no results array): treat as text.
    let summary = ellipsize(text, SUMMARY_LENGTH);
    let sections = chunk_text(text, 1_500)
        .into_iter()
        .take(4)
        .enumerate()
        .map(|(i, chunk)| Section {
            title: format!("Results Part {}", i + 1),
            content: chunk,
            importance: if i == 0 {
                Importance::High
            } else {
                Importance::Medium
            },
        })
        .collect();
    Some(chunked(tool_name, summary, sections, text.len(), None, None))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plain text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn process_plain(tool_name: &str, text: &str) -> Option<ProcessedResponse> {
    let summary = ellipsize(text, SUMMARY_LENGTH);
    let sections = chunk_text(text, 2_000)
        .into_iter()
        .take(3)
        .enumerate()
        .map(|(i, chunk)| Section {
            title: format!("Content Part {}", i + 1),
            content: chunk,
            importance: if i == 0 {
                Importance::High
            } else {
                Importance::Medium
            },
        })
        .collect();
    Some(chunked(tool_name, summary, sections, text.len(), None, None))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn chunked(
    tool_name: &str,
    summary: String,
    sections: Vec<Section>,
    original_length: usize,
    url: Option<String>,
    title: Option<String>,
) -> ProcessedResponse {
    // Hard bound: concatenated section content never exceeds the input,
    // whatever the per-path section builders produced.
    let mut remaining = original_length;
    let mut bounded = Vec::with_capacity(sections.len());
    for mut section in sections {
        if remaining == 0 {
            break;
        }
        if section.content.len() > remaining {
            section.content = if remaining > 3 {
                ellipsize(&section.content, remaining - 3)
            } else {
                safe_prefix(&section.content, remaining).to_string()
            };
        }
        remaining -= section.content.len();
        bounded.push(section);
    }

    let processed_length = bounded.iter().map(|s| s.content.len()).sum();
    ProcessedResponse::Chunked {
        tool: tool_name.to_string(),
        summary,
        sections: bounded,
        metadata: ChunkMetadata {
            original_length,
            processed_length,
            url,
            title,
        },
    }
}

/// Split into sentence-bounded chunks of at most `max_chunk_size`
/// characters, re-appending a terminating period. Sentences that alone
/// exceed the limit are truncated with an ellipsis.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in SENTENCE_RE.split(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        // +1: the period re-appended below must also fit.
        if sentence.len() + 1 > max_chunk_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(format!(
                "{}...",
                safe_prefix(sentence, max_chunk_size.saturating_sub(3))
            ));
            continue;
        }
        // +2 for the joining space and trailing period.
        if !current.is_empty() && current.len() + sentence.len() + 2 > max_chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        current.push('.');
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn strip_tags(html: &str) -> String {
    TAG_RE.replace_all(html, " ").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

fn ellipsize(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        format!("{}...", safe_prefix(text, max))
    }
}

/// Byte-length prefix that never splits a character.
fn safe_prefix(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn sections_of(resp: &ProcessedResponse) -> &[Section] {
        match resp {
            ProcessedResponse::Chunked { sections, .. } => sections,
            ProcessedResponse::Truncated { .. } => panic!("expected chunked response"),
        }
    }

    fn metadata_of(resp: &ProcessedResponse) -> &ChunkMetadata {
        match resp {
            ProcessedResponse::Chunked { metadata, .. } => metadata,
            ProcessedResponse::Truncated { .. } => panic!("expected chunked response"),
        }
    }

    fn big_html() -> String {
        let mut body = String::new();
        for i in 0..400 {
            body.push_str(&format!("<p>Paragraph number {i} with some words in it.</p>"));
        }
        format!(
            "<html><head><title>Example Domain</title>\
             <meta name=\"description\" content=\"An example page.\"></head>\
             <body><script>var x = 1;</script><h1>Welcome</h1><h2>Details</h2>\
             <a href=\"https://example.com/start\">link</a>{body}</body></html>"
        )
    }

    #[test]
    fn fetch_result_extracts_title_summary_and_headings() {
        let html = big_html();
        let resp = process_response("s1_fetch_page", &html);
        let sections = sections_of(&resp);
        assert!(sections.len() <= 5);
        assert_eq!(sections[0].title, "Page Title");
        assert_eq!(sections[0].content, "Example Domain");
        assert_eq!(sections[0].importance, Importance::High);
        assert_eq!(sections[1].title, "Summary");
        assert_eq!(sections[1].content, "An example page.");
        assert_eq!(sections[2].title, "Key Sections");
        assert!(sections[2].content.contains("Welcome • Details"));

        let meta = metadata_of(&resp);
        assert_eq!(meta.original_length, html.len());
        assert_eq!(meta.title.as_deref(), Some("Example Domain"));
        assert_eq!(meta.url.as_deref(), Some("https://example.com/start"));
        // Script bodies never leak into content.
        assert!(sections.iter().all(|s| !s.content.contains("var x")));
    }

    #[test]
    fn processed_length_never_exceeds_original() {
        let html = big_html();
        let resp = process_response("fetch", &html);
        let meta = metadata_of(&resp);
        assert!(meta.processed_length <= meta.original_length);
        assert_eq!(resp.processed_length(), meta.processed_length);
    }

    #[test]
    fn huge_heading_cannot_blow_the_content_bound() {
        // One giant heading and nothing else: without capping, the heading
        // would appear uncut in "Key Sections" and again as a content
        // chunk, overrunning the original length.
        let html = format!("<h1>{}</h1>", "X".repeat(4_992));
        assert!(html.len() >= LARGE_RESPONSE_THRESHOLD);

        let resp = process_response("fetch_page", &html);
        let meta = metadata_of(&resp);
        assert_eq!(meta.original_length, html.len());
        assert!(meta.processed_length <= meta.original_length);
        assert_eq!(resp.processed_length(), meta.processed_length);

        let key_sections = sections_of(&resp)
            .iter()
            .find(|s| s.title == "Key Sections")
            .unwrap();
        assert!(key_sections.content.len() <= HEADING_LENGTH + 3);
        assert!(key_sections.content.ends_with("..."));
    }

    #[test]
    fn search_json_results_become_per_result_sections() {
        let mut results = Vec::new();
        for i in 0..8 {
            results.push(serde_json::json!({
                "title": format!("Hit {i}"),
                "snippet": format!("Snippet for hit {i}. {}", "pad ".repeat(300)),
            }));
        }
        let text = serde_json::json!({ "results": results }).to_string();
        assert!(text.len() >= LARGE_RESPONSE_THRESHOLD);

        let resp = process_response("web_search", &text);
        let sections = sections_of(&resp);
        // Summary + at most five results.
        assert_eq!(sections.len(), 6);
        assert_eq!(sections[0].title, "Summary");
        assert_eq!(sections[1].title, "Hit 0");
        assert_eq!(sections[1].importance, Importance::Medium);
        assert_eq!(sections[2].importance, Importance::Medium);
        assert_eq!(sections[3].importance, Importance::Low);
    }

    #[test]
    fn search_non_json_falls_back_to_text_chunks() {
        let text = "A finding. ".repeat(700);
        let resp = process_response("crawl_site", &text);
        let sections = sections_of(&resp);
        assert!(sections.len() <= 4);
        assert!(sections.iter().all(|s| s.content.len() <= 1_500));
        assert_eq!(sections[0].importance, Importance::High);
        assert_eq!(sections[1].importance, Importance::Medium);
    }

    #[test]
    fn plain_tool_gets_three_chunks_max() {
        let text = "Something happened here. ".repeat(500);
        let resp = process_response("read_log", &text);
        let sections = sections_of(&resp);
        assert!(sections.len() <= 3);
        assert!(sections.iter().all(|s| s.content.len() <= 2_000));
        assert_eq!(sections[0].importance, Importance::High);
        assert_eq!(sections[1].importance, Importance::Medium);
    }

    #[test]
    fn chunk_text_respects_max_and_reappends_periods() {
        let text = "One. Two! Three? Four.";
        let chunks = chunk_text(text, 12);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        assert!(chunks[0].starts_with("One."));
        let joined = chunks.join(" ");
        assert!(joined.contains("Two."));
        assert!(joined.contains("Three."));
    }

    #[test]
    fn oversized_sentence_is_truncated_with_ellipsis() {
        let text = "x".repeat(50);
        let chunks = chunk_text(&text, 20);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with("..."));
        assert!(chunks[0].len() <= 20);
    }

    #[test]
    fn safe_prefix_respects_char_boundaries() {
        let text = "héllo wörld";
        let prefix = safe_prefix(text, 2);
        assert!(prefix.len() <= 2);
        assert!(text.starts_with(prefix));
    }
}
