//! Text helpers for HKP's HTML responses.

/// Escape `<`, `>`, `&` and `"` for inclusion in HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(|c: char| matches!(c, '<' | '>' | '&' | '"')) {
        out.push_str(&rest[..pos]);
        out.push_str(match rest.as_bytes()[pos] {
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'&' => "&amp;",
            _ => "&quot;",
        });
        rest = &rest[pos + 1..];
    }

    out.push_str(rest);
    out
}

/// The last `len` characters of `s`, or all of `s` when shorter.
pub fn last_chars(s: &str, len: usize) -> &str {
    let count = s.chars().count();
    if count <= len {
        return s;
    }
    let start = s
        .char_indices()
        .nth(count - len)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

/// Group a fingerprint in blocks of four by inserting a space before every
/// fourth character.
pub fn format_fingerprint(fingerprint: &str) -> String {
    let mut out = String::with_capacity(fingerprint.len() + fingerprint.len() / 4);
    for (i, c) in fingerprint.chars().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
