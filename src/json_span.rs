// src/json_span.rs

/// Where the JSON object sits in a blob of model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSpan<'a> {
    /// First `{` through last `}`.
    Found(&'a str),
    /// An object was opened but never closed (cut-off output).
    Truncated(&'a str),
    /// No `{` at all.
    Missing,
}

/// Extract the outermost JSON object from model output that may carry
/// surrounding prose, markdown fences or reasoning text.
///
/// The span runs from the first `{` to the last `}`. Nothing is parsed here;
/// `None` means there is no `{...}` span at all.
pub fn find_json_object(text: &str) -> Option<&str> {
    match locate_json(text) {
        JsonSpan::Found(span) => Some(span),
        JsonSpan::Truncated(_) | JsonSpan::Missing => None,
    }
}

/// Like [`find_json_object`] but tells a cut-off object apart from prose
/// that never contained one.
pub fn locate_json(text: &str) -> JsonSpan<'_> {
    let Some(start) = text.find('{') else {
        return JsonSpan::Missing;
    };
    match text.rfind('}') {
        Some(end) if end > start => JsonSpan::Found(&text[start..=end]),
        _ => JsonSpan::Truncated(&text[start..]),
    }
}
