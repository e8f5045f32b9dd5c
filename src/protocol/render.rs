//! Text rendering for tool activity, search results and generated media.

use serde_json::Value;

use crate::protocol::upstream::{
    is_truthy, CodeExecutionResult, TAG_FUNCTION_CALL, TAG_FUNCTION_RESULT,
};
use crate::util::{escape_html_attr, truncate_chars};

pub const THINK_OPEN: &str = "<think>\n";
pub const THINK_CLOSE: &str = "</think>\n";

const RELAY_MESSAGE_MAX_CHARS: usize = 100;
const STDOUT_MAX_CHARS: usize = 200;

/// Human-readable summary of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSummary {
    Search { name: String, query: String },
    Browse { name: String, url: String },
    Relay { to: String, message: String },
    CodeExecution,
    Other { name: String },
}

/// Which tool-name table resolves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDialect {
    /// Atomic `functionCall` objects.
    Structured,
    /// Fragments reassembled from `function_call` tokens.
    Legacy,
}

fn arguments_object(arguments: Option<&Value>) -> serde_json::Map<String, Value> {
    match arguments {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        },
        _ => serde_json::Map::new(),
    }
}

fn str_arg(args: &serde_json::Map<String, Value>, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Resolve a tool call to a summary; `None` for an unnamed call.
#[must_use]
pub fn summarize_tool_call(
    dialect: ToolDialect,
    name: &str,
    arguments: Option<&Value>,
) -> Option<ToolSummary> {
    if name.is_empty() {
        return None;
    }
    let args = arguments_object(arguments);
    let name_owned = name.to_owned();
    let summary = match (dialect, name) {
        (ToolDialect::Structured, "web_search")
        | (ToolDialect::Legacy, "web_search" | "search") => ToolSummary::Search {
            name: name_owned,
            query: str_arg(&args, "query"),
        },
        (ToolDialect::Structured, "web_browse")
        | (ToolDialect::Legacy, "browse" | "browse_web") => ToolSummary::Browse {
            name: name_owned,
            url: str_arg(&args, "url"),
        },
        (ToolDialect::Structured, "chatroom_send") => ToolSummary::Relay {
            to: str_arg(&args, "to"),
            message: str_arg(&args, "message"),
        },
        (ToolDialect::Legacy, "code_execution") => ToolSummary::CodeExecution,
        _ => ToolSummary::Other { name: name_owned },
    };
    Some(summary)
}

/// Render a structured tool call as a single thinking-block line.
///
/// Search, browse and relay calls without their key argument render nothing.
#[must_use]
pub fn render_structured_call(summary: &ToolSummary, prefix: &str) -> String {
    match summary {
        ToolSummary::Search { query, .. } if !query.is_empty() => {
            format!("{prefix}\u{1f50d} Search: {query}\n")
        }
        ToolSummary::Browse { url, .. } if !url.is_empty() => {
            format!("{prefix}\u{1f310} Browse: {url}\n")
        }
        ToolSummary::Relay { to, message } if !message.is_empty() => {
            let short = truncate_chars(message, RELAY_MESSAGE_MAX_CHARS);
            format!("{prefix}\u{1f4ac} \u{2192} {to}: {short}\n")
        }
        ToolSummary::CodeExecution => format!("{prefix}\u{1f5a5}\u{fe0f} Running code\n"),
        ToolSummary::Other { name } => format!("{prefix}\u{1f527} {name}\n"),
        ToolSummary::Search { .. } | ToolSummary::Browse { .. } | ToolSummary::Relay { .. } => {
            String::new()
        }
    }
}

fn render_legacy_call(summary: &ToolSummary) -> String {
    match summary {
        ToolSummary::Search { name, query } if query.is_empty() => {
            format!("\n\u{1f50d} {name}\n")
        }
        ToolSummary::Browse { name, url } if url.is_empty() => format!("\n\u{1f310} {name}\n"),
        other => {
            let mut line = String::from("\n");
            line.push_str(&render_structured_call(other, ""));
            line
        }
    }
}

/// Prepend `prefix` to every non-empty line of `text`.
#[must_use]
pub fn prefix_lines(prefix: &str, text: &str) -> String {
    if prefix.is_empty() {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len() + prefix.len() * 2);
    for line in text.split_inclusive('\n') {
        if line != "\n" {
            out.push_str(prefix);
        }
        out.push_str(line);
    }
    out
}

/// Format a flushed legacy tool buffer; empty when nothing renderable.
#[must_use]
pub fn format_tool_buffer(tag: &str, content: &str) -> String {
    let Ok(data) = serde_json::from_str::<Value>(content) else {
        return String::new();
    };
    match tag {
        TAG_FUNCTION_CALL => {
            let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
            summarize_tool_call(ToolDialect::Legacy, name, data.get("arguments"))
                .map(|summary| render_legacy_call(&summary))
                .unwrap_or_default()
        }
        TAG_FUNCTION_RESULT => {
            let failed = data.as_object().is_some_and(|obj| {
                obj.get("error").is_some_and(is_truthy)
                    || obj.get("success") == Some(&Value::Bool(false))
            });
            if failed {
                "\n\u{274c} Failed\n".to_string()
            } else {
                "\n\u{2705} Succeeded\n".to_string()
            }
        }
        _ => String::new(),
    }
}

/// Search results as either `{"results": [...]}` or a bare list.
#[must_use]
pub fn search_result_list(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("results")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    }
}

#[must_use]
pub fn render_search_count(count: usize, prefix: &str) -> String {
    format!("{prefix}\u{1f4c4} Found {count} results\n")
}

#[must_use]
pub fn render_code_result(result: &CodeExecutionResult, prefix: &str) -> String {
    if result.exit_code.unwrap_or(-1) == 0 {
        let stdout = result.stdout.as_deref().unwrap_or_default().trim();
        if stdout.is_empty() {
            return format!("{prefix}\u{2705} Succeeded\n");
        }
        let short = truncate_chars(stdout, STDOUT_MAX_CHARS);
        return format!("{prefix}\u{2705} Succeeded: {short}\n");
    }
    let last_line = result
        .stderr
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("unknown error");
    format!("{prefix}\u{274c} Failed: {last_line}\n")
}

/// Markdown bullet list of inline search attachments.
#[must_use]
pub fn render_search_bullets(results: &[Value]) -> String {
    let mut out = String::new();
    for result in results {
        let field = |key: &str| result.get(key).and_then(Value::as_str).unwrap_or_default();
        let preview = field("preview").replace('\n', "");
        out.push_str("\n- [");
        out.push_str(field("title"));
        out.push_str("](");
        out.push_str(field("url"));
        out.push_str(" \"");
        out.push_str(&preview);
        out.push_str("\")");
    }
    out.push('\n');
    out
}

#[must_use]
pub fn render_video_progress(progress: i64) -> String {
    format!("Generating video, progress {progress}%\n")
}

#[must_use]
pub fn render_image_progress(image_index: u32, progress: i64) -> String {
    format!(
        "Generating image {}, progress {progress}%\n",
        image_index.saturating_add(1)
    )
}

/// Video markup: a plain link, or a poster card with a play badge.
#[must_use]
pub fn render_video(video_url: &str, thumbnail_url: &str, poster_preview: bool) -> String {
    let safe_video = escape_html_attr(video_url);
    if safe_video.is_empty() {
        return String::new();
    }
    let safe_thumb = escape_html_attr(thumbnail_url);
    if !poster_preview || safe_thumb.is_empty() {
        return format!(
            "<a href=\"{safe_video}\" target=\"_blank\" rel=\"noopener noreferrer\">{safe_video}</a>"
        );
    }
    format!(
        concat!(
            "<a href=\"{video}\" target=\"_blank\" rel=\"noopener noreferrer\" ",
            "style=\"display:inline-block;position:relative;max-width:100%;text-decoration:none;\">\n",
            "  <img src=\"{thumb}\" alt=\"video\" ",
            "style=\"max-width:100%;height:auto;border-radius:12px;display:block;\" />\n",
            "  <span style=\"position:absolute;inset:0;display:flex;align-items:center;justify-content:center;\">\n",
            "    <span style=\"width:64px;height:64px;border-radius:9999px;background:rgba(0,0,0,.55);",
            "display:flex;align-items:center;justify-content:center;\">\n",
            "      <span style=\"width:0;height:0;border-top:12px solid transparent;",
            "border-bottom:12px solid transparent;border-left:18px solid #fff;margin-left:4px;\"></span>\n",
            "    </span>\n",
            "  </span>\n",
            "</a>"
        ),
        video = safe_video,
        thumb = safe_thumb,
    )
}

/// Drop blank entries and bare-root URLs (`/` path, no query or fragment).
#[must_use]
pub fn normalize_image_urls(urls: &[Value]) -> Vec<String> {
    urls.iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .filter(|url| !is_bare_root(url))
        .map(str::to_owned)
        .collect()
}

fn is_bare_root(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.path(), "" | "/")
                && parsed.query().is_none()
                && parsed.fragment().is_none()
        }
        Err(_) => raw == "/",
    }
}

/// Asset id used as the Markdown alt text: the second-to-last path segment.
#[must_use]
pub fn image_alt(original_url: &str) -> &str {
    let mut segments = original_url.rsplit('/');
    segments.next();
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("image")
}

#[must_use]
pub fn render_image_markdown(alt: &str, url: &str) -> String {
    format!("![{alt}]({url})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_lines_skips_blank_lines() {
        assert_eq!(prefix_lines("[A] ", "a\n\nb"), "[A] a\n\n[A] b");
        assert_eq!(prefix_lines("[A] ", "\n"), "\n");
        assert_eq!(prefix_lines("", "a\nb"), "a\nb");
    }

    #[test]
    fn structured_search_and_browse_lines() {
        let search = summarize_tool_call(
            ToolDialect::Structured,
            "web_search",
            Some(&json!({"query": "rust async"})),
        )
        .unwrap();
        assert_eq!(
            render_structured_call(&search, "[a] "),
            "[a] \u{1f50d} Search: rust async\n"
        );

        let browse = summarize_tool_call(
            ToolDialect::Structured,
            "web_browse",
            Some(&json!("{\"url\":\"https://r.example\"}")),
        )
        .unwrap();
        assert_eq!(
            render_structured_call(&browse, ""),
            "\u{1f310} Browse: https://r.example\n"
        );
    }

    #[test]
    fn structured_search_without_query_renders_nothing() {
        let search =
            summarize_tool_call(ToolDialect::Structured, "web_search", Some(&json!({}))).unwrap();
        assert_eq!(render_structured_call(&search, ""), "");
    }

    #[test]
    fn relay_message_is_truncated_to_100_chars() {
        let message = "x".repeat(150);
        let relay = summarize_tool_call(
            ToolDialect::Structured,
            "chatroom_send",
            Some(&json!({"to": "Harper", "message": message})),
        )
        .unwrap();
        let line = render_structured_call(&relay, "");
        assert_eq!(line, format!("\u{1f4ac} \u{2192} Harper: {}...\n", "x".repeat(100)));
    }

    #[test]
    fn legacy_aliases_resolve_through_fallback_table() {
        assert_eq!(
            format_tool_buffer("function_call", "{\"name\":\"web_search\"}"),
            "\n\u{1f50d} web_search\n"
        );
        assert_eq!(
            format_tool_buffer(
                "function_call",
                "{\"name\":\"search\",\"arguments\":\"{\\\"query\\\":\\\"q\\\"}\"}"
            ),
            "\n\u{1f50d} Search: q\n"
        );
        assert_eq!(
            format_tool_buffer("function_call", "{\"name\":\"code_execution\"}"),
            "\n\u{1f5a5}\u{fe0f} Running code\n"
        );
        assert_eq!(
            format_tool_buffer("function_call", "{\"name\":\"calculator\"}"),
            "\n\u{1f527} calculator\n"
        );
        assert_eq!(
            format_tool_buffer("function_call", "{\"name\":\"browse_web\",\"arguments\":{\"url\":\"u\"}}"),
            "\n\u{1f310} Browse: u\n"
        );
    }

    #[test]
    fn legacy_results_render_bare_markers() {
        assert_eq!(
            format_tool_buffer("raw_function_result", "{\"ok\":1}"),
            "\n\u{2705} Succeeded\n"
        );
        assert_eq!(
            format_tool_buffer("raw_function_result", "{\"success\":false}"),
            "\n\u{274c} Failed\n"
        );
        assert_eq!(format_tool_buffer("raw_function_result", "{\"par"), "");
    }

    #[test]
    fn code_results_render_stdout_or_last_stderr_line() {
        let ok = CodeExecutionResult {
            exit_code: Some(0),
            stdout: Some(format!("  {}  ", "y".repeat(250))),
            stderr: None,
        };
        assert_eq!(
            render_code_result(&ok, ""),
            format!("\u{2705} Succeeded: {}...\n", "y".repeat(200))
        );

        let failed = CodeExecutionResult {
            exit_code: Some(1),
            stdout: None,
            stderr: Some("Traceback\n  File x\nNameError: y\n\n".to_string()),
        };
        assert_eq!(render_code_result(&failed, "[e] "), "[e] \u{274c} Failed: NameError: y\n");

        let unknown = CodeExecutionResult::default();
        assert_eq!(render_code_result(&unknown, ""), "\u{274c} Failed: unknown error\n");
    }

    #[test]
    fn search_results_accept_object_or_list() {
        let object = json!({"results": [{"title": "a"}, {"title": "b"}]});
        assert_eq!(search_result_list(&object).len(), 2);
        let list = json!([{"title": "a"}]);
        assert_eq!(search_result_list(&list).len(), 1);
        assert!(search_result_list(&json!("nope")).is_empty());
    }

    #[test]
    fn search_bullets_strip_preview_newlines() {
        let results = vec![json!({"title": "T", "url": "https://u", "preview": "line1\nline2"})];
        assert_eq!(
            render_search_bullets(&results),
            "\n- [T](https://u \"line1line2\")\n"
        );
    }

    #[test]
    fn image_urls_drop_blank_and_root_only_entries() {
        let urls = vec![
            json!(" https://x/y.png "),
            json!(""),
            json!("https://assets.example.com/"),
            json!("https://assets.example.com/?sig=1"),
            json!("/"),
            json!(42),
        ];
        assert_eq!(
            normalize_image_urls(&urls),
            vec!["https://x/y.png", "https://assets.example.com/?sig=1"]
        );
    }

    #[test]
    fn image_alt_uses_parent_segment() {
        assert_eq!(image_alt("https://a/users/u1/gen/abc123/image.jpg"), "abc123");
        assert_eq!(image_alt("image.jpg"), "image");
    }

    #[test]
    fn video_markup_variants() {
        assert_eq!(
            render_video("https://p/v.mp4", "https://p/t.jpg", false),
            "<a href=\"https://p/v.mp4\" target=\"_blank\" rel=\"noopener noreferrer\">https://p/v.mp4</a>"
        );
        let card = render_video("https://p/v.mp4", "https://p/t.jpg", true);
        assert!(card.contains("<img src=\"https://p/t.jpg\""));
        assert!(card.contains("border-left:18px solid #fff"));
        assert!(render_video("https://p/v.mp4", "", true).starts_with("<a href="));
        assert_eq!(render_video("", "t", true), "");
    }
}
