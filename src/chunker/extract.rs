use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Pre-chunk text extraction by file extension. Markdown/HTML/JSON are
/// reduced to their indexable text content; anything else passes through
/// unchanged.
pub fn extract(content: &str, ext: &str, exclude_code_languages: &[String]) -> String {
    match ext.to_ascii_lowercase().as_str() {
        "md" | "mdx" => extract_markdown(content, exclude_code_languages),
        "html" | "htm" => extract_html(content),
        "json" => extract_json(content),
        _ => content.to_string(),
    }
}

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([a-zA-Z0-9_+-]*)\r?\n(.*?)```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static BOLD_USCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__([^_]+)__").unwrap());
static ITALIC_USCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_([^_]+)_").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+").unwrap());

fn extract_markdown(content: &str, exclude_code_languages: &[String]) -> String {
    let without_fences = FENCED_BLOCK.replace_all(content, |caps: &regex::Captures| {
        let lang = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if !lang.is_empty() && exclude_code_languages.iter().any(|l| l.eq_ignore_ascii_case(&lang)) {
            String::new()
        } else {
            body.to_string()
        }
    });

    let without_inline_code = INLINE_CODE.replace_all(&without_fences, "$1");
    let without_links = LINK.replace_all(&without_inline_code, "$1");
    let without_bold_star = BOLD_STAR.replace_all(&without_links, "$1");
    let without_italic_star = ITALIC_STAR.replace_all(&without_bold_star, "$1");
    let without_bold_uscore = BOLD_USCORE.replace_all(&without_italic_star, "$1");
    let without_italic_uscore = ITALIC_USCORE.replace_all(&without_bold_uscore, "$1");
    let without_headings = HEADING.replace_all(&without_italic_uscore, "");

    without_headings.into_owned()
}

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

fn extract_html(content: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(content, "");
    let without_styles = STYLE_BLOCK.replace_all(&without_scripts, "");
    let without_tags = ANY_TAG.replace_all(&without_styles, "");

    without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

const JSON_MAX_DEPTH: usize = 10;

fn extract_json(content: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return content.to_string();
    };
    let mut leaves = Vec::new();
    collect_leaves(&value, 0, &mut leaves);
    leaves.join(" ")
}

fn collect_leaves(value: &Value, depth: usize, out: &mut Vec<String>) {
    if depth > JSON_MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_leaves(value, depth + 1, out);
            }
        }
        Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_strips_excluded_language_block() {
        let md = "before\n```python\nsecret_code()\n```\nafter";
        let out = extract_markdown(md, &["python".to_string()]);
        assert!(!out.contains("secret_code"));
    }

    #[test]
    fn markdown_keeps_block_with_no_language() {
        let md = "```\nkeep_me()\n```";
        let out = extract_markdown(md, &["python".to_string()]);
        assert!(out.contains("keep_me()"));
    }

    #[test]
    fn markdown_strips_link_syntax_preserving_text() {
        let md = "see [the docs](https://example.com) for more";
        let out = extract_markdown(md, &[]);
        assert!(out.contains("the docs"));
        assert!(!out.contains("https://example.com"));
    }

    #[test]
    fn markdown_strips_heading_markers() {
        let md = "## Title\nbody";
        let out = extract_markdown(md, &[]);
        assert!(out.contains("Title"));
        assert!(!out.contains('#'));
    }

    #[test]
    fn html_removes_script_and_tags() {
        let html = "<html><script>evil()</script><p>Hello <b>World</b></p></html>";
        let out = extract_html(html);
        assert!(!out.contains("evil"));
        assert!(out.contains("Hello"));
        assert!(out.contains("World"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn json_concatenates_leaves() {
        let json = r#"{"a": "hello", "b": [1, 2, {"c": true}]}"#;
        let out = extract_json(json);
        assert!(out.contains("hello"));
        assert!(out.contains('1'));
        assert!(out.contains("true"));
    }

    #[test]
    fn json_passthrough_on_parse_failure() {
        let broken = "not json {";
        assert_eq!(extract_json(broken), broken);
    }
}
