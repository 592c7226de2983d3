//! Small Markdown to HTML converter used by the HTML export.
//!
//! It covers the subset the Markdown export produces (headings, emphasis,
//! links, rules, code, flat lists, anchors and paragraphs). It is not a
//! general CommonMark implementation.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Link targets accepted besides relative paths and fragments.
const LINK_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

enum Replacement {
    Template(&'static str),
    With(fn(&Captures) -> String),
}

struct Rule {
    pattern: Regex,
    replacement: Replacement,
}

impl Rule {
    fn apply(&self, html: &str) -> String {
        match self.replacement {
            Replacement::Template(template) => {
                self.pattern.replace_all(html, template).into_owned()
            }
            Replacement::With(render) => self.pattern.replace_all(html, render).into_owned(),
        }
    }
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("markdown rule pattern is valid"),
        replacement: Replacement::Template(replacement),
    }
}

fn rule_with(pattern: &str, render: fn(&Captures) -> String) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("markdown rule pattern is valid"),
        replacement: Replacement::With(render),
    }
}

/// True for fragments, relative paths and the schemes in `LINK_SCHEMES`.
fn is_safe_link(target: &str) -> bool {
    let scheme_end = target.find(|c| matches!(c, ':' | '/' | '?' | '#'));
    match scheme_end {
        Some(index) if target[index..].starts_with(':') => {
            let scheme = target[..index].to_ascii_lowercase();
            LINK_SCHEMES.contains(&scheme.as_str())
        }
        _ => true,
    }
}

/// Unsafe targets keep only the label.
fn render_link(caps: &Captures) -> String {
    let label = &caps[1];
    let target = caps[2].trim();
    if !is_safe_link(target) {
        return label.to_string();
    }
    format!(r#"<a href="{}">{label}</a>"#, target.replace('"', "&quot;"))
}

static BLOCK_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(r"(?m)^###### (.+)$", "<h6>${1}</h6>"),
        rule(r"(?m)^##### (.+)$", "<h5>${1}</h5>"),
        rule(r"(?m)^#### (.+)$", "<h4>${1}</h4>"),
        rule(r"(?m)^### (.+)$", "<h3>${1}</h3>"),
        rule(r"(?m)^## (.+)$", "<h2>${1}</h2>"),
        rule(r"(?m)^# (.+)$", "<h1>${1}</h1>"),
        rule(r"(?s)\*\*\*(.+?)\*\*\*", "<strong><em>${1}</em></strong>"),
        rule(r"(?s)\*\*(.+?)\*\*", "<strong>${1}</strong>"),
        rule(r"(?s)\*(.+?)\*", "<em>${1}</em>"),
        rule_with(r"\[([^\]]+)\]\(([^)]+)\)", render_link),
        rule(r"(?m)^---$", "<hr>"),
        rule(
            r"(?s)```(\w*)\n(.*?)```",
            r#"<pre><code class="language-${1}">${2}</code></pre>"#,
        ),
        rule(r"`([^`]+)`", "<code>${1}</code>"),
        rule(r"(?m)^- (.+)$", "<li>${1}</li>"),
        rule(r"(?s)(<li>.*</li>\n)+", "<ul>${0}</ul>"),
        rule(r#"&lt;a id="([^"&]+)"&gt;&lt;/a&gt;"#, r#"<a id="${1}"></a>"#),
        rule(r"\n\n+", "</p><p>"),
    ]
});

static CLEANUP_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(r"<p>\s*</p>", ""),
        rule(r"<p>\s*(<h[1-6]>)", "${1}"),
        rule(r"(</h[1-6]>)\s*</p>", "${1}"),
        rule(r"<p>\s*<hr>\s*</p>", "<hr>"),
        rule(r"<p>\s*(<ul>)", "${1}"),
        rule(r"(</ul>)\s*</p>", "${1}"),
        rule(r"<p>\s*(<pre>)", "${1}"),
        rule(r"(</pre>)\s*</p>", "${1}"),
        rule(r"<p>\s*(<a id=)", "${1}"),
    ]
});

/// Escapes `&`, `<` and `>`. Quotes are left alone.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = escape_html(markdown);
    for rule in BLOCK_RULES.iter() {
        html = rule.apply(&html);
    }
    html = format!("<p>{html}</p>");
    for rule in CLEANUP_RULES.iter() {
        html = rule.apply(&html);
    }
    html
}

const STYLESHEET: &str = r#"        :root {
            --primary-color: #2563eb;
            --text-color: #1f2937;
            --muted-color: #6b7280;
            --border-color: #e5e7eb;
            --bg-color: #ffffff;
            --code-bg: #f3f4f6;
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            line-height: 1.6;
            color: var(--text-color);
            max-width: 900px;
            margin: 0 auto;
            padding: 2rem;
            background: var(--bg-color);
        }

        h1 {
            color: var(--primary-color);
            border-bottom: 2px solid var(--primary-color);
            padding-bottom: 0.5rem;
            margin-top: 2rem;
        }

        h2 {
            border-bottom: 1px solid var(--border-color);
            padding-bottom: 0.3rem;
            margin-top: 2rem;
        }

        h3, h4, h5, h6 {
            margin-top: 1.5rem;
        }

        hr {
            border: none;
            border-top: 1px solid var(--border-color);
            margin: 2rem 0;
        }

        a {
            color: var(--primary-color);
            text-decoration: none;
        }

        a:hover {
            text-decoration: underline;
        }

        code {
            background: var(--code-bg);
            padding: 0.2em 0.4em;
            border-radius: 3px;
            font-size: 0.9em;
        }

        pre {
            background: var(--code-bg);
            padding: 1rem;
            border-radius: 6px;
            overflow-x: auto;
        }

        pre code {
            background: none;
            padding: 0;
        }

        ul {
            padding-left: 1.5rem;
        }

        li {
            margin-bottom: 0.5rem;
        }

        em {
            color: var(--muted-color);
        }

        blockquote {
            border-left: 4px solid var(--primary-color);
            margin: 1rem 0;
            padding-left: 1rem;
            color: var(--muted-color);
        }

        @media print {
            body {
                max-width: none;
                padding: 1rem;
            }

            a {
                color: var(--text-color);
            }

            h1, h2 {
                page-break-after: avoid;
            }

            pre, blockquote {
                page-break-inside: avoid;
            }
        }
"#;

/// Standalone French HTML page around already converted content.
pub fn wrap_html_document(title: &str, content: &str, exported_at: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="fr">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - Export Documentation</title>
    <style>
{STYLESHEET}    </style>
</head>
<body>
    {content}

    <footer style="margin-top: 3rem; padding-top: 1rem; border-top: 1px solid var(--border-color); color: var(--muted-color); font-size: 0.875rem;">
        <p>Exporté depuis Documentation Collaborative le {exported_at}</p>
    </footer>
</body>
</html>
"#,
        title = escape_html(title),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_headings_and_emphasis() {
        let html = markdown_to_html("# Titre\n\n**gras** et *italique*");
        assert!(html.starts_with("<h1>Titre</h1>"));
        assert!(html.contains("<strong>gras</strong>"));
        assert!(html.contains("<em>italique</em>"));
    }

    #[test]
    fn escapes_raw_html_before_converting() {
        let html = markdown_to_html("<script>alert(1)</script> & co");
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp; co"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn keeps_generated_anchors() {
        let html = markdown_to_html("<a id=\"plan\"></a>\n## Plan");
        assert!(html.contains("<a id=\"plan\"></a>"));
        assert!(html.contains("<h2>Plan</h2>"));
    }

    #[test]
    fn wraps_list_items_and_links() {
        let html = markdown_to_html("- [Plan](#plan)\n- [Budget](#budget)\n");
        assert!(html.contains("<ul><li><a href=\"#plan\">Plan</a></li>\n<li>"));
        assert!(html.contains("</li>\n</ul>"));
    }

    #[test]
    fn links_only_keep_safe_targets() {
        let html =
            markdown_to_html("[x](javascript:alert(1)) [y](JavaScript:void) [z](data:text/html,hi)");
        assert!(!html.contains("href"));
        assert!(html.contains("x"));

        let html = markdown_to_html(
            "[doc](https://example.org/a?b=1) [mail](mailto:a@b.fr) [rel](/docs)",
        );
        assert!(html.contains(r#"<a href="https://example.org/a?b=1">doc</a>"#));
        assert!(html.contains(r#"<a href="mailto:a@b.fr">mail</a>"#));
        assert!(html.contains(r#"<a href="/docs">rel</a>"#));
    }

    #[test]
    fn link_quotes_cannot_leave_the_attribute() {
        let html = markdown_to_html(r#"[x](https://a.fr/" onmouseover="alert)"#);
        assert!(html.contains(r#"<a href="https://a.fr/&quot; onmouseover=&quot;alert">x</a>"#));
    }

    #[test]
    fn converts_code_and_rules() {
        let html = markdown_to_html("---\n\n```rust\nfn main() {}\n```\n\nuse `cargo`");
        assert!(html.starts_with("<hr>"));
        assert!(html.contains("<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"));
        assert!(html.contains("<code>cargo</code>"));
    }

    #[test]
    fn separates_paragraphs_and_drops_empty_ones() {
        let html = markdown_to_html("premier\n\n\nsecond");
        assert_eq!(html, "<p>premier</p><p>second</p>");
    }

    #[test]
    fn wrapper_sets_language_title_and_footer() {
        let page = wrap_html_document("Atelier <2026>", "<p>x</p>", "08/01/2026 à 17:47");
        assert!(page.starts_with("<!DOCTYPE html>\n<html lang=\"fr\">"));
        assert!(page.contains("<title>Atelier &lt;2026&gt; - Export Documentation</title>"));
        assert!(page.contains("Exporté depuis Documentation Collaborative le 08/01/2026 à 17:47"));
    }
}
