//! File-name sanitization for media titles.

/// Characters that are illegal in file names on at least one common platform.
const ILLEGAL: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Turns a media title into a safe file stem.
///
/// - Removes `\ / * ? : " < > |` and control characters
/// - Collapses whitespace runs into a single space
/// - Trims leading/trailing whitespace
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;

    for c in title.chars() {
        if ILLEGAL.contains(&c) || (c.is_control() && !c.is_whitespace()) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

/// File stem for a resolved title, falling back to the media id and then to `download`.
pub fn file_stem(title: &str, media_id: Option<&str>) -> String {
    let stem = sanitize_title(title);
    if !stem.is_empty() {
        return stem;
    }
    media_id
        .map(sanitize_title)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}
