//! Plain-text and image extraction from feed HTML.
//!
//! Text nodes are entity-decoded, trimmed and joined with newlines, so tags
//! such as `<br>` or `<p>` end up as line breaks. `<script>` and `<style>`
//! bodies and comments are dropped.

/// Result of [`extract`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedHtml {
    /// Plain text body
    pub text: String,
    /// `src` of the first `<img>` tag, if any
    pub image_url: Option<String>,
}

/// Extract plain text and the first image from an HTML fragment.
pub fn extract(html: &str) -> ExtractedHtml {
    let mut segments: Vec<String> = Vec::new();
    let mut image_url = None;
    let mut skipping: Option<String> = None;
    let mut rest = html;

    while !rest.is_empty() {
        let Some(start) = find_tag_start(rest) else {
            if skipping.is_none() {
                push_segment(&mut segments, rest);
            }
            break;
        };

        if skipping.is_none() {
            push_segment(&mut segments, &rest[..start]);
        }
        let after = &rest[start + 1..];

        if let Some(comment) = after.strip_prefix("!--") {
            match comment.find("-->") {
                Some(end) => rest = &comment[end + 3..],
                None => break,
            }
            continue;
        }

        let Some(end) = after.find('>') else {
            break;
        };
        let tag = &after[..end];
        rest = &after[end + 1..];

        let closing = tag.starts_with('/');
        let name = tag_name(tag);

        if let Some(raw) = &skipping {
            if closing && name == *raw {
                skipping = None;
            }
            continue;
        }

        match name.as_str() {
            "script" | "style" if !closing && !tag.ends_with('/') => {
                skipping = Some(name.clone());
            }
            "img" if image_url.is_none() => image_url = attribute(tag, "src"),
            _ => {}
        }
    }

    ExtractedHtml {
        text: segments.join("\n"),
        image_url,
    }
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// Position of the next `<` that opens a tag, comment or declaration
fn find_tag_start(text: &str) -> Option<usize> {
    text.match_indices('<').map(|(i, _)| i).find(|&i| {
        text[i + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
    })
}

fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let decoded = decode_entities(raw);
    let trimmed = decoded.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Value of an attribute inside a tag body (`img src="..." alt=x`).
fn attribute(tag: &str, wanted: &str) -> Option<String> {
    // Skip the tag name
    let mut rest = tag.trim_start_matches(|c: char| c.is_ascii_alphanumeric());

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return None;
        }

        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        rest = rest[name_len..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (value, remainder) = match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    match body.find(quote) {
                        Some(end) => (&body[..end], &body[end + 1..]),
                        None => (body, ""),
                    }
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            rest = remainder;
            Some(value)
        } else {
            None
        };

        if name.eq_ignore_ascii_case(wanted) {
            return value
                .map(|v| decode_entities(v).trim().to_string())
                .filter(|v| !v.is_empty());
        }
    }
}

/// Decode HTML character references
fn decode_entities(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];

        let decoded = candidate
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| decode_entity(&candidate[..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                result.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                result.push('&');
                rest = candidate;
            }
        }
    }

    result.push_str(rest);
    result
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "ndash" => Some('\u{2013}'),
        "mdash" => Some('\u{2014}'),
        "hellip" => Some('\u{2026}'),
        "rsquo" => Some('\u{2019}'),
        "lsquo" => Some('\u{2018}'),
        "rdquo" => Some('\u{201d}'),
        "ldquo" => Some('\u{201c}'),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let hex = numeric
                .strip_prefix('x')
                .or_else(|| numeric.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
