use std::fmt::Write as _;

use crate::util::push_json_string_escaped;

use super::OpenAiStreamChunk;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Identity fields repeated on every chunk of one session.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader<'a> {
    pub id: &'a str,
    pub created: u64,
    pub model: &'a str,
    pub system_fingerprint: Option<&'a str>,
}

/// Encode one assistant content delta as an SSE `data:` frame.
#[must_use]
pub fn encode_content_delta(
    header: &ChunkHeader<'_>,
    content: &str,
    finish_reason: Option<&str>,
) -> String {
    let mut out = String::with_capacity(
        192 + header.id.len() + header.model.len() + content.len(),
    );
    push_openai_chunk_prefix(&mut out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":");
    push_json_string_escaped(&mut out, content);
    out.push_str("},\"logprobs\":null,\"finish_reason\":");
    match finish_reason {
        Some(reason) => push_json_string_escaped(&mut out, reason),
        None => out.push_str("null"),
    }
    out.push_str("}]}\n\n");
    out
}

fn push_openai_chunk_prefix(out: &mut String, header: &ChunkHeader<'_>) {
    out.push_str("data: {\"id\":");
    push_json_string_escaped(out, header.id);
    let _ = write!(
        out,
        ",\"object\":\"chat.completion.chunk\",\"created\":{},\"model\":",
        header.created
    );
    push_json_string_escaped(out, header.model);
    out.push_str(",\"system_fingerprint\":");
    match header.system_fingerprint {
        Some(fingerprint) => push_json_string_escaped(out, fingerprint),
        None => out.push_str("null"),
    }
}

/// Parse a single SSE line into an `OpenAiStreamChunk`.
/// Returns `None` for comments, empty lines, `data: [DONE]`, and non-data lines.
#[must_use]
pub fn parse_openai_sse_line(line: &str) -> Option<OpenAiStreamChunk> {
    let payload = line.trim().strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return None;
    }
    serde_json::from_str(payload).ok()
}
