//! Content normalisation: raw markdown or HTML in, summarisation-ready text out.
//!
//! Two deterministic, side-effect-free paths converge on the same shape of
//! output: structure flattened to headings/paragraphs/bullets, links reduced
//! to their visible text, images, citations and wiki templates removed.
//! Normalisation is idempotent; running it over already-cleaned text is a
//! no-op.

use lazy_static::lazy_static;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which raw representation a scrape produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Markdown,
    Html,
}

/// How much structure the markdown cleaner is allowed to discard.
///
/// `Standard` keeps fenced code verbatim and reduces tables to plain
/// pipe-delimited rows; `Aggressive` drops code blocks, tables and
/// blockquote bodies entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningLevel {
    #[default]
    Standard,
    Aggressive,
}

/// Plain, lightly-structured text ready for summarisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedContent {
    pub text: String,
}

impl CleanedContent {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

lazy_static! {
    static ref RE_CITATION: Regex =
        Regex::new(r"(?i)\[\d+\]|\[citation needed\]|\[note \d+\]").unwrap();
    static ref RE_MD_IMAGE: Regex = Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap();
    static ref RE_MD_LINK: Regex = Regex::new(r"\[([^\]]*)\]\(([^)]*)\)").unwrap();
    static ref RE_HTML_IMG: Regex = Regex::new(r"(?is)<img[^>]*>").unwrap();
    static ref RE_HTML_LINK: Regex = Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap();
    static ref RE_HTML_COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref RE_WIKI_TEMPLATE: Regex = Regex::new(r"(?s)\{\{[^{}]*\}\}").unwrap();
    static ref RE_SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap();
    static ref RE_STYLE_BLOCK: Regex = Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap();
    static ref RE_HTML_TAG: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref RE_HRULE: Regex = Regex::new(r"(?m)^\s*[-*_]{3,}\s*$").unwrap();
    static ref RE_TABLE_SEPARATOR: Regex = Regex::new(r"^\s*\|?[\s:|-]+\|\s*$").unwrap();
    static ref RE_BLANK_RUNS: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Normalise raw page content into cleaned text. Pure function; the same
/// input always yields the same output.
pub fn normalize(raw: &str, format: RawFormat, level: CleaningLevel) -> CleanedContent {
    let text = match format {
        RawFormat::Markdown => clean_markdown(raw, level),
        RawFormat::Html => clean_html(raw),
    };
    CleanedContent { text }
}

/// Strip citation markers and collapse inline whitespace runs.
fn clean_inline(text: &str) -> String {
    let without_citations = RE_CITATION.replace_all(text, "");
    without_citations
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Markdown path: walk the block/inline token stream and re-emit only the
/// structure we keep.
fn clean_markdown(raw: &str, level: CleaningLevel) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(raw, options);

    let mut blocks: Vec<String> = Vec::new();
    let mut buf = String::new();
    // Depth counters for content we swallow entirely.
    let mut image_depth = 0usize;
    let mut quote_skip = 0usize;
    let mut item_depth = 0usize;
    let mut in_code = false;
    let mut code_lang = String::new();
    let mut code_buf = String::new();
    let mut in_table = false;
    let mut table_cell = String::new();
    let mut table_row: Vec<String> = Vec::new();
    let mut in_table_cell = false;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                buf.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                let text = clean_inline(&buf);
                if !text.is_empty() {
                    let hashes = "#".repeat(heading_depth(level));
                    blocks.push(format!("{} {}", hashes, text));
                }
                buf.clear();
            }
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                // Inside a list item the paragraph text stays in the buffer
                // so the whole item renders as one bullet.
                if item_depth == 0 && quote_skip == 0 {
                    let text = clean_inline(&buf);
                    if !text.is_empty() {
                        blocks.push(text);
                    }
                    buf.clear();
                } else if item_depth > 0 {
                    buf.push(' ');
                }
            }
            Event::Start(Tag::Item) => {
                item_depth += 1;
                buf.clear();
            }
            Event::End(TagEnd::Item) => {
                item_depth = item_depth.saturating_sub(1);
                if quote_skip == 0 {
                    let text = clean_inline(&buf);
                    if !text.is_empty() {
                        blocks.push(format!("- {}", text));
                    }
                }
                buf.clear();
            }
            Event::Start(Tag::Image { .. }) => image_depth += 1,
            Event::End(TagEnd::Image) => image_depth = image_depth.saturating_sub(1),
            // Links keep only their anchor text.
            Event::Start(Tag::Link { .. }) | Event::End(TagEnd::Link) => {}
            Event::Start(Tag::BlockQuote(_)) => {
                if level == CleaningLevel::Aggressive {
                    quote_skip += 1;
                }
            }
            Event::End(TagEnd::BlockQuote(_)) => {
                quote_skip = quote_skip.saturating_sub(1);
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code = true;
                code_buf.clear();
                code_lang = match kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                if level == CleaningLevel::Standard && quote_skip == 0 {
                    let body = code_buf.trim_end_matches('\n');
                    blocks.push(format!("```{}\n{}\n```", code_lang, body));
                }
                code_buf.clear();
            }
            Event::Start(Tag::Table(_)) => {
                in_table = true;
            }
            Event::End(TagEnd::Table) => {
                in_table = false;
            }
            Event::Start(Tag::TableCell) => {
                in_table_cell = true;
                table_cell.clear();
            }
            Event::End(TagEnd::TableCell) => {
                in_table_cell = false;
                table_row.push(clean_inline(&table_cell));
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                if level == CleaningLevel::Standard {
                    let row = table_row.join(" | ");
                    if !row.trim().is_empty() {
                        blocks.push(row);
                    }
                }
                table_row.clear();
            }
            Event::Text(text) => {
                if image_depth > 0 || quote_skip > 0 {
                    continue;
                }
                if in_code {
                    code_buf.push_str(&text);
                } else if in_table && in_table_cell {
                    table_cell.push_str(&text);
                } else {
                    buf.push_str(&text);
                }
            }
            Event::Code(code) => {
                if image_depth == 0 && quote_skip == 0 {
                    if in_table && in_table_cell {
                        table_cell.push_str(&code);
                    } else {
                        buf.push_str(&code);
                    }
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_table && in_table_cell {
                    table_cell.push(' ');
                } else {
                    buf.push(' ');
                }
            }
            // Horizontal rules, raw HTML and footnotes carry no prose.
            Event::Rule
            | Event::Html(_)
            | Event::InlineHtml(_)
            | Event::FootnoteReference(_)
            | Event::TaskListMarker(_) => {}
            _ => {}
        }
    }

    blocks.join("\n\n").trim().to_string()
}

/// HTML-fallback path: sequential text substitutions over the raw markup.
fn clean_html(raw: &str) -> String {
    let mut text = raw.to_string();

    // Script and style bodies would otherwise survive the tag strip below.
    text = RE_SCRIPT_BLOCK.replace_all(&text, "").into_owned();
    text = RE_STYLE_BLOCK.replace_all(&text, "").into_owned();
    text = RE_HTML_COMMENT.replace_all(&text, "").into_owned();

    // Images gone entirely, hyperlinks reduced to their visible text.
    text = RE_MD_IMAGE.replace_all(&text, "").into_owned();
    text = RE_HTML_IMG.replace_all(&text, "").into_owned();
    text = RE_MD_LINK.replace_all(&text, "$1").into_owned();
    text = RE_HTML_LINK.replace_all(&text, "$1").into_owned();

    // Wiki-style templates may nest; peel until none remain.
    loop {
        let replaced = RE_WIKI_TEMPLATE.replace_all(&text, "").into_owned();
        if replaced == text {
            break;
        }
        text = replaced;
    }

    text = RE_CITATION.replace_all(&text, "").into_owned();
    text = RE_HRULE.replace_all(&text, "").into_owned();
    text = RE_HTML_TAG.replace_all(&text, "").into_owned();
    text = decode_entities(&text);

    // Table pipe syntax becomes plain rows; separator rows vanish.
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if RE_TABLE_SEPARATOR.is_match(line) {
            continue;
        }
        let line = if line.contains('|') {
            line.trim_matches(|c: char| c.is_whitespace() || c == '|')
                .split('|')
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            line.to_string()
        };
        // Collapse inline whitespace runs without touching line structure.
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        lines.push(collapsed);
    }
    let joined = lines.join("\n");

    RE_BLANK_RUNS.replace_all(&joined, "\n\n").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD_SAMPLE: &str = "\
# Title [1]

Intro paragraph with a [link](https://example.com/a) and an \
![image](https://example.com/pic.png) inline [citation needed].

## Section

- first item [2]
- second item with [another link](https://example.com/b)

```rust
let x = 1;
```

| Col A | Col B |
|-------|-------|
| 1     | 2     |

Closing    paragraph   with   spaced    words [note 3].
";

    fn md(raw: &str, level: CleaningLevel) -> String {
        normalize(raw, RawFormat::Markdown, level).text
    }

    #[test]
    fn markdown_path_flattens_structure() {
        let text = md(MD_SAMPLE, CleaningLevel::Standard);
        assert!(text.starts_with("# Title"));
        assert!(text.contains("## Section"));
        assert!(text.contains("- first item"));
        assert!(text.contains("Intro paragraph with a link and an inline"));
        assert!(text.contains("```rust\nlet x = 1;\n```"));
        assert!(text.contains("Col A | Col B"));
        assert!(text.contains("Closing paragraph with spaced words"));
    }

    #[test]
    fn aggressive_level_drops_code_and_tables() {
        let text = md(MD_SAMPLE, CleaningLevel::Aggressive);
        assert!(!text.contains("```"));
        assert!(!text.contains("let x = 1;"));
        assert!(!text.contains('|'));
        assert!(text.contains("- first item"));
    }

    #[test]
    fn no_image_link_or_citation_leakage() {
        for level in [CleaningLevel::Standard, CleaningLevel::Aggressive] {
            let text = md(MD_SAMPLE, level);
            assert!(!text.contains("!["), "image markup leaked: {text}");
            assert!(!text.contains("https://"), "url leaked: {text}");
            assert!(!text.contains("]("), "link target leaked: {text}");
            assert!(!RE_CITATION.is_match(&text), "citation leaked: {text}");
        }
    }

    #[test]
    fn markdown_normalization_is_idempotent() {
        for level in [CleaningLevel::Standard, CleaningLevel::Aggressive] {
            let once = md(MD_SAMPLE, level);
            let twice = md(&once, level);
            assert_eq!(once, twice);
        }
    }

    const HTML_SAMPLE: &str = "\
<h1>Heading</h1>
<!-- tracking comment -->
<p>Paragraph with a <a href=\"https://example.com\">visible label</a> and
an <img src=\"https://example.com/x.png\" alt=\"pic\"> image [12].</p>
{{Infobox | irrelevant}}
<script>var s = 'noise';</script>
<hr/>
| a | b |
|---|---|
| 1 | 2 |
<p>Done &amp; dusted.</p>
";

    #[test]
    fn html_path_reduces_markup_to_text() {
        let text = normalize(HTML_SAMPLE, RawFormat::Html, CleaningLevel::Standard).text;
        assert!(text.contains("Heading"));
        assert!(text.contains("visible label"));
        assert!(text.contains("Done & dusted."));
        assert!(!text.contains("https://"));
        assert!(!text.contains("<"));
        assert!(!text.contains("Infobox"));
        assert!(!text.contains("noise"));
        assert!(!text.contains("[12]"));
        assert!(text.contains("a b"));
        assert!(!text.contains("---"));
    }

    #[test]
    fn html_normalization_is_idempotent() {
        let once = normalize(HTML_SAMPLE, RawFormat::Html, CleaningLevel::Standard).text;
        let twice = normalize(&once, RawFormat::Html, CleaningLevel::Standard).text;
        assert_eq!(once, twice);
    }

    #[test]
    fn blank_line_runs_collapse() {
        let text = normalize(
            "one\n\n\n\n\ntwo",
            RawFormat::Html,
            CleaningLevel::Standard,
        )
        .text;
        assert_eq!(text, "one\n\ntwo");
    }

    #[test]
    fn empty_input_yields_empty_content() {
        let cleaned = normalize("   \n  ", RawFormat::Markdown, CleaningLevel::Standard);
        assert!(cleaned.is_empty());
    }
}
