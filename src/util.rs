use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[inline]
fn needs_json_escape(ch: char) -> bool {
    ch == '"' || ch == '\\' || ch < '\u{20}'
}

/// Append `value` as a quoted JSON string, escaped the way `serde_json` does.
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    out.push('"');
    let mut rest = value;
    while let Some(pos) = rest.find(needs_json_escape) {
        let (clean, tail) = rest.split_at(pos);
        out.push_str(clean);
        let mut chars = tail.chars();
        if let Some(ch) = chars.next() {
            match ch {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\u{08}' => out.push_str("\\b"),
                '\u{0c}' => out.push_str("\\f"),
                control => {
                    let _ = write!(out, "\\u{:04x}", u32::from(control));
                }
            }
        }
        rest = chars.as_str();
    }
    out.push_str(rest);
    out.push('"');
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + 3);
            out.push_str(&value[..cut]);
            out.push_str("...");
            out
        }
        None => value.to_owned(),
    }
}

/// Escape a value for use inside a double-quoted HTML attribute.
pub(crate) fn escape_html_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{escape_html_attr, push_json_string_escaped, truncate_chars};

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji \u{1f600} caf\u{e9}",
            "<think>\n[expert-2] \u{1f50d} query\n",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("\u{4f60}\u{597d}\u{4e16}\u{754c}", 2), "\u{4f60}\u{597d}...");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn escape_html_attr_escapes_quotes_and_brackets() {
        assert_eq!(
            escape_html_attr("https://a/b?x=1&y=\"2\"<"),
            "https://a/b?x=1&amp;y=&quot;2&quot;&lt;"
        );
    }
}
