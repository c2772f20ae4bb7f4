//! Markdown-subset rendering for model output.
//!
//! The raw text is HTML-escaped first, then scanned into a small tree of
//! blocks and inlines, then emitted as markup. Escaping up front means nothing
//! in the model's output can become live markup except what the scanner emits
//! itself.
//!
//! Supported: fenced code blocks, inline code, `**bold**`, `*italic*`,
//! `#`/`##`/`###` headings, `[text](url)` links and line breaks.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Fenced code. `code` is already escaped.
    Code { lang: String, code: String },
    /// `level` is the number of leading `#` (1 to 3).
    Heading { level: u8, content: Vec<Inline> },
    Line(Vec<Inline>),
    /// A run of `n` consecutive newlines.
    Break(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Code(String),
    Strong(Vec<Inline>),
    Emphasis(Vec<Inline>),
    Link { text: Vec<Inline>, url: String },
}

/// Escape the three HTML metacharacters.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_angles(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">")
}

/// Render model output to display-ready HTML.
pub fn render(raw: &str) -> String {
    to_html(&parse(raw))
}

/// Render to wrapped plain terminal text.
pub fn render_terminal(raw: &str, width: usize) -> String {
    let html = render(raw);
    html2text::from_read(html.as_bytes(), width.max(20))
}

/// Escape `raw` and scan it into blocks.
pub fn parse(raw: &str) -> Vec<Block> {
    let escaped = escape_html(raw);
    let mut blocks = Vec::new();
    let mut rest = escaped.as_str();
    let mut text = String::new();

    while let Some(start) = rest.find("```") {
        match fenced_block(&rest[start..]) {
            Some((lang, code, consumed)) => {
                text.push_str(&rest[..start]);
                scan_text(&text, &mut blocks);
                text.clear();
                blocks.push(Block::Code {
                    lang: lang.to_string(),
                    code: code.to_string(),
                });
                rest = &rest[start + consumed..];
            }
            None => {
                // Unmatched fence: keep the backticks as text.
                text.push_str(&rest[..start + 3]);
                rest = &rest[start + 3..];
            }
        }
    }
    text.push_str(rest);
    scan_text(&text, &mut blocks);
    blocks
}

/// Match "```lang\ncode\n```" at the start of `input`.
/// Returns the language tag, the code and the number of bytes consumed.
fn fenced_block(input: &str) -> Option<(&str, &str, usize)> {
    let after_ticks = &input[3..];
    let lang_len = after_ticks
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(after_ticks.len());
    let lang = &after_ticks[..lang_len];
    let body = after_ticks[lang_len..].strip_prefix('\n')?;
    let close = body.find("\n```")?;
    let code = &body[..close];
    let consumed = 3 + lang_len + 1 + close + 4;
    Some((lang, code, consumed))
}

fn scan_text(text: &str, blocks: &mut Vec<Block>) {
    let mut rest = text;
    let mut at_line_start = blocks.is_empty()
        || matches!(blocks.last(), Some(Block::Break(_)));

    while !rest.is_empty() {
        let newlines = rest.len() - rest.trim_start_matches('\n').len();
        if newlines > 0 {
            blocks.push(Block::Break(newlines));
            rest = &rest[newlines..];
            at_line_start = true;
            continue;
        }

        let end = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..end];
        rest = &rest[end..];

        match heading(line).filter(|_| at_line_start) {
            Some((level, content)) => blocks.push(Block::Heading {
                level,
                content: parse_inline(content),
            }),
            None => blocks.push(Block::Line(parse_inline(line))),
        }
        at_line_start = false;
    }
}

fn heading(line: &str) -> Option<(u8, &str)> {
    let hashes = line.len() - line.trim_start_matches('#').len();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    line[hashes..].strip_prefix(' ').map(|content| (hashes as u8, content))
}

/// Scan one line of escaped text into inline nodes.
///
/// Code spans win over everything, and `**` is always tried before a single
/// `*` so doubled markers are never read as emphasis.
pub fn parse_inline(line: &str) -> Vec<Inline> {
    let bytes = line.as_bytes();
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < bytes.len() {
        let prev_star = i > 0 && bytes[i - 1] == b'*';
        match bytes[i] {
            b'`' => {
                if let Some(len) = line[i + 1..].find('`').filter(|&len| len > 0) {
                    flush(&mut text, &mut nodes);
                    nodes.push(Inline::Code(line[i + 1..i + 1 + len].to_string()));
                    i += len + 2;
                    continue;
                }
            }
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                if let Some(len) = line[i + 2..].find("**") {
                    flush(&mut text, &mut nodes);
                    nodes.push(Inline::Strong(parse_inline(&line[i + 2..i + 2 + len])));
                    i += len + 4;
                } else {
                    text.push_str("**");
                    i += 2;
                }
                continue;
            }
            b'*' if !prev_star => {
                if let Some(close) = closing_star(bytes, i + 1) {
                    flush(&mut text, &mut nodes);
                    nodes.push(Inline::Emphasis(parse_inline(&line[i + 1..close])));
                    i = close + 1;
                    continue;
                }
            }
            b'[' => {
                if let Some((label, url, consumed)) = link(&line[i..]) {
                    flush(&mut text, &mut nodes);
                    nodes.push(Inline::Link {
                        text: parse_inline(label),
                        url: url.to_string(),
                    });
                    i += consumed;
                    continue;
                }
            }
            _ => {}
        }

        // Markers are ASCII, so everything up to the next one is whole chars.
        let step = line[i..].chars().next().map_or(1, char::len_utf8);
        let next = line[i + step..]
            .find(['`', '*', '['])
            .map(|offset| i + step + offset)
            .unwrap_or(line.len());
        text.push_str(&line[i..next]);
        i = next;
    }

    flush(&mut text, &mut nodes);
    nodes
}

fn flush(text: &mut String, nodes: &mut Vec<Inline>) {
    if !text.is_empty() {
        nodes.push(Inline::Text(std::mem::take(text)));
    }
}

/// A single `*` at or after `from` that is not next to another `*`.
fn closing_star(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len()).find(|&j| {
        bytes[j] == b'*' && bytes[j - 1] != b'*' && bytes.get(j + 1) != Some(&b'*')
    })
}

fn link(input: &str) -> Option<(&str, &str, usize)> {
    let label_end = input.find("](")?;
    let label = &input[1..label_end];
    let url_start = label_end + 2;
    let url_len = input[url_start..].find(')')?;
    let url = &input[url_start..url_start + url_len];
    Some((label, url, url_start + url_len + 1))
}

pub fn to_html(blocks: &[Block]) -> String {
    let mut html = String::new();
    for block in blocks {
        match block {
            Block::Code { lang, code } => {
                let class = if lang.is_empty() {
                    String::new()
                } else {
                    format!("language-{}", lang)
                };
                html.push_str(&format!("<pre><code class=\"{}\">{}</code></pre>", class, code));
            }
            Block::Heading { level, content } => {
                let tag = format!("h{}", 3 + level);
                html.push_str(&format!("<{}>{}</{}>", tag, inlines_to_html(content), tag));
            }
            Block::Line(content) => html.push_str(&inlines_to_html(content)),
            Block::Break(1) => html.push_str("<br>"),
            Block::Break(n) => html.push_str(&"<br><br>".repeat(n / 2)),
        }
    }
    html
}

fn inlines_to_html(nodes: &[Inline]) -> String {
    let mut html = String::new();
    for node in nodes {
        match node {
            Inline::Text(text) => html.push_str(text),
            Inline::Code(code) => html.push_str(&format!("<code>{}</code>", code)),
            Inline::Strong(inner) => {
                html.push_str(&format!("<strong>{}</strong>", inlines_to_html(inner)))
            }
            Inline::Emphasis(inner) => html.push_str(&format!("<em>{}</em>", inlines_to_html(inner))),
            Inline::Link { text, url } => {
                // The label and target were escaped with everything else; angle
                // brackets are restored so they show literally. A quote would end
                // the attribute, so it stays encoded.
                let href = unescape_angles(url).replace('"', "&quot;");
                html.push_str(&format!(
                    "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                    href,
                    unescape_angles(&inlines_to_html(text))
                ));
            }
        }
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bold_and_italic() {
        assert_eq!(
            render("**bold** and *italic*"),
            "<strong>bold</strong> and <em>italic</em>"
        );
    }

    #[test]
    fn test_escapes_before_formatting() {
        assert_eq!(
            render("<script>alert('x')</script> & **<b>**"),
            "&lt;script&gt;alert('x')&lt;/script&gt; &amp; <strong>&lt;b&gt;</strong>"
        );
    }

    #[test]
    fn test_plain_text_is_stable() {
        let plain = "Nothing special here, just words.";
        assert_eq!(render(plain), plain);
        assert_eq!(render(&render(plain)), render(plain));
    }

    #[test]
    fn test_fenced_code_block() {
        let html = render("Look:\n```rust\nfn main() { *x* }\n```\ndone");
        assert_eq!(
            html,
            "Look:<br><pre><code class=\"language-rust\">fn main() { *x* }</code></pre><br>done"
        );
    }

    #[test]
    fn test_fence_without_language_and_multiline_body() {
        let html = render("```\na < b\nb > c\n```");
        assert_eq!(html, "<pre><code class=\"\">a &lt; b\nb &gt; c</code></pre>");
    }

    #[test]
    fn test_unmatched_fence_is_text() {
        assert_eq!(render("```rust\nno close"), "```rust<br>no close");
    }

    #[test]
    fn test_inline_code_is_literal() {
        assert_eq!(render("use `**x**` here"), "use <code>**x**</code> here");
        assert_eq!(render("empty `` ticks"), "empty `` ticks");
    }

    #[test]
    fn test_double_star_is_not_italic() {
        assert_eq!(render("a ** b"), "a ** b");
        assert_eq!(render("**a *b*"), "**a <em>b</em>");
    }

    #[test]
    fn test_nested_emphasis() {
        assert_eq!(
            render("**bold with *inner* words**"),
            "<strong>bold with <em>inner</em> words</strong>"
        );
    }

    #[test]
    fn test_headings() {
        assert_eq!(
            render("# One\n## Two\n### Three\n#### Four"),
            "<h4>One</h4><br><h5>Two</h5><br><h6>Three</h6><br>#### Four"
        );
        assert_eq!(render("#NoSpace"), "#NoSpace");
        assert_eq!(render("text # not heading"), "text # not heading");
    }

    #[test]
    fn test_link_opens_new_context() {
        assert_eq!(
            render("see [the docs](https://example.com/a?b=1&c=2)"),
            "see <a href=\"https://example.com/a?b=1&amp;c=2\" target=\"_blank\" rel=\"noopener noreferrer\">the docs</a>"
        );
    }

    #[test]
    fn test_link_restores_angle_brackets() {
        assert_eq!(
            render("[a <tag>](http://x/<y>)"),
            "<a href=\"http://x/<y>\" target=\"_blank\" rel=\"noopener noreferrer\">a <tag></a>"
        );
    }

    #[test]
    fn test_link_href_quote_stays_encoded() {
        let html = render("[x](a\" onclick=\"b)");
        assert!(html.contains("href=\"a&quot; onclick=&quot;b\""));
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(render("a\nb"), "a<br>b");
        assert_eq!(render("a\n\nb"), "a<br><br>b");
        assert_eq!(render("a\n\n\nb"), "a<br><br>b");
        assert_eq!(render("a\n\n\n\nb"), "a<br><br><br><br>b");
    }

    #[test]
    fn test_unicode_is_preserved() {
        assert_eq!(render("héllo *wörld*✓"), "héllo <em>wörld</em>✓");
    }

    #[test]
    fn test_parse_tree() {
        let blocks = parse("# Title\ntext `c`");
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 1,
                    content: vec![Inline::Text("Title".to_string())]
                },
                Block::Break(1),
                Block::Line(vec![
                    Inline::Text("text ".to_string()),
                    Inline::Code("c".to_string())
                ]),
            ]
        );
    }

    #[test]
    fn test_terminal_rendering_keeps_text() {
        let text = render_terminal("**Hello** from `code`", 80);
        assert!(text.contains("Hello"));
        assert!(text.contains("code"));
    }
}
