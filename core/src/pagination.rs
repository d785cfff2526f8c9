//! `Link` header parsing for cursor pagination.
//!
//! The continuation cursor is never decoded; the `rel="next"` URI is
//! followed verbatim.

use crate::http::HttpResponse;

/// URI of the `rel="next"` entry across all `Link` headers of `response`.
pub fn next_link(response: &HttpResponse) -> Option<String> {
    response
        .header_values("link")
        .flat_map(split_entries)
        .find_map(|entry| {
            let (uri, params) = parse_entry(entry)?;
            params
                .filter_map(|p| p.split_once('='))
                .filter(|(name, _)| name.trim().eq_ignore_ascii_case("rel"))
                .any(|(_, value)| {
                    value
                        .trim()
                        .trim_matches('"')
                        .split_ascii_whitespace()
                        .any(|rel| rel.eq_ignore_ascii_case("next"))
                })
                .then(|| uri.to_string())
        })
}

/// Split a header value on commas that are not inside `<...>` or quotes.
fn split_entries(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_uri = false;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '<' if !in_quotes => in_uri = true,
            '>' if !in_quotes => in_uri = false,
            '"' if !in_uri => in_quotes = !in_quotes,
            ',' if !in_uri && !in_quotes => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries
}

/// `<uri>; p1; p2` to the URI and an iterator over the raw parameters.
fn parse_entry(entry: &str) -> Option<(&str, impl Iterator<Item = &str>)> {
    let entry = entry.trim();
    let rest = entry.strip_prefix('<')?;
    let close = rest.find('>')?;
    let uri = &rest[..close];
    let params = rest[close + 1..].split(';').map(str::trim).filter(|p| !p.is_empty());
    Some((uri, params))
}
