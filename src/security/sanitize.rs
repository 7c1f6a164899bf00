//! Allow-list HTML sanitizer for message bodies. Formatting tags pass
//! through bare (attributes dropped); everything else is stripped.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"(?is)<[^>]*>").expect("Invalid tag regex");
}

const ALLOWED_TAGS: &[&str] = &["b", "i", "u", "em", "strong", "p", "br"];

/// Sanitize a message body against the allow-list and the length cap.
/// A body exactly at the cap is accepted; one byte over is rejected.
pub fn sanitize_body(body: &str, max_len: usize) -> Result<String> {
    if body.len() > max_len {
        return Err(Error::validation("body", "exceeds maximum length"));
    }
    let cleaned = TAG_RE.replace_all(body, |caps: &regex::Captures<'_>| {
        let tag = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        normalize_allowed(tag).unwrap_or_default()
    });
    Ok(cleaned.into_owned())
}

/// Returns the canonical bare form for an allowed tag, None otherwise.
fn normalize_allowed(tag: &str) -> Option<String> {
    let inner = tag.trim_start_matches('<').trim_end_matches('>').trim();
    let (closing, name) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest.trim()),
        None => (false, inner),
    };
    // drop attributes and self-closing slashes
    let name = name
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('/')
        .to_ascii_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return None;
    }
    if closing {
        Some(format!("</{}>", name))
    } else {
        Some(format!("<{}>", name))
    }
}

pub fn sanitize_subject(subject: &str, max_len: usize) -> Result<String> {
    if subject.len() > max_len {
        return Err(Error::validation("subject", "exceeds maximum length"));
    }
    // subjects are plain text
    Ok(TAG_RE.replace_all(subject, "").into_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allowed_tags_survive() {
        let out = sanitize_body("<b>contact</b> in <em>sector 5</em>", 1000).unwrap();
        assert_eq!(out, "<b>contact</b> in <em>sector 5</em>");
    }

    #[test]
    fn test_hostile_tags_stripped() {
        let out = sanitize_body(r#"<script>alert(1)</script><img src=x onerror=pwn()>"#, 1000)
            .unwrap();
        assert_eq!(out, "alert(1)");
    }

    #[test]
    fn test_attributes_dropped_from_allowed_tags() {
        let out = sanitize_body(r#"<b onclick="pwn()">bold</b>"#, 1000).unwrap();
        assert_eq!(out, "<b>bold</b>");
    }

    #[test]
    fn test_length_cap_boundary() {
        let body = "a".repeat(100);
        assert!(sanitize_body(&body, 100).is_ok());
        let over = "a".repeat(101);
        assert!(sanitize_body(&over, 100).is_err());
    }

    #[test]
    fn test_subject_is_plain_text() {
        let out = sanitize_subject("<b>urgent</b>", 100).unwrap();
        assert_eq!(out, "urgent");
    }
}
