//! Turning model output into speakable text

use std::sync::OnceLock;

use regex::Regex;

const NO_DETAILS: &str = "No details available.";
const NO_DESCRIPTION: &str = "No description returned.";

fn markup() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[*_`#]+").expect("static pattern"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static pattern"))
}

/// Strip markdown markers and collapse whitespace so a TTS engine reads the
/// text cleanly
pub fn normalize_for_speech(text: &str) -> String {
    let cleaned = markup().replace_all(text, " ");
    whitespace().replace_all(&cleaned, " ").trim().to_string()
}

/// Split normalized text into sentences, keeping the terminating punctuation
pub fn sentences(text: &str) -> Vec<String> {
    let normalized = normalize_for_speech(text);
    let mut parts = Vec::new();
    let mut start = 0;

    for boundary in sentence_end().find_iter(&normalized) {
        // Punctuation marks are single-byte, so this stays on a char boundary
        let end = boundary.start() + 1;
        push_trimmed(&mut parts, &normalized[start..end]);
        start = boundary.end();
    }
    push_trimmed(&mut parts, &normalized[start..]);
    parts
}

/// Detail chunks for keyboard navigation. Never empty.
pub fn split_details(description: &str) -> Vec<String> {
    let parts = sentences(description);
    if parts.is_empty() {
        vec![NO_DETAILS.to_string()]
    } else {
        parts
    }
}

/// Short summary made of the first two sentences
pub fn build_summary(description: &str) -> String {
    let parts = sentences(description);
    if parts.is_empty() {
        return NO_DESCRIPTION.to_string();
    }
    parts.into_iter().take(2).collect::<Vec<_>>().join(" ")
}

fn push_trimmed(parts: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        parts.push(piece.to_string());
    }
}
