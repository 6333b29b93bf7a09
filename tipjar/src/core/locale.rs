//! `Accept-Language` negotiation for templates.

/// Locale used when the client expresses no usable preference.
pub const DEFAULT_LOCALE: &str = "en";

/// Parse an `Accept-Language` header into language tags, best first.
///
/// Tags are lowercased. Wildcards, malformed tags, and `q=0` entries are
/// dropped; entries with equal quality keep their header order.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    use std::sync::LazyLock;
    static TAG_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z]{1,8}(?:-[a-zA-Z0-9]{1,8})*$").unwrap());

    let mut weighted: Vec<(u16, usize, String)> = Vec::new();
    for (index, part) in header.split(',').enumerate() {
        let mut pieces = part.split(';');
        let tag = pieces.next().unwrap_or_default().trim();
        if tag.is_empty() || tag == "*" || !TAG_RE.is_match(tag) {
            continue;
        }

        let mut quality = 1000u16;
        for param in pieces {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("q") {
                quality = parse_quality(value.trim()).unwrap_or(0);
            }
        }
        if quality == 0 {
            continue;
        }

        let tag = tag.to_lowercase();
        if weighted.iter().any(|(_, _, existing)| *existing == tag) {
            continue;
        }
        weighted.push((quality, index, tag));
    }

    weighted.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    weighted.into_iter().map(|(_, _, tag)| tag).collect()
}

/// Quality values are in thousandths (`q=0.8` -> 800).
fn parse_quality(raw: &str) -> Option<u16> {
    let value: f32 = raw.parse().ok()?;
    if !(0.0..=1.0).contains(&value) {
        return None;
    }
    Some((value * 1000.0).round() as u16)
}

/// First preferred locale, or [`DEFAULT_LOCALE`].
pub fn preferred_locale(header: Option<&str>) -> String {
    header
        .map(parse_accept_language)
        .and_then(|tags| tags.into_iter().next())
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}
