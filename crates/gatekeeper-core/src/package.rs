//! Package name extraction from request paths

use std::borrow::Cow;

/// Derive the package name a request is about.
///
/// The namespaced package-info form `/-/package/<name>/...` takes
/// precedence; otherwise the name is the first path segment. Scoped names
/// arrive percent-encoded (`/@scope%2fname`) and are decoded before any
/// policy lookup.
pub fn package_name(path: &str) -> Option<String> {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.trim_start_matches('/');

    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix("-/package/") {
        let name = rest.split('/').next().unwrap_or(rest);
        if !name.is_empty() {
            return Some(percent_decode(name));
        }
        return None;
    }

    let first = trimmed.split('/').next().unwrap_or(trimmed);
    Some(percent_decode(first))
}

/// Decode `%XX` escapes; malformed escapes and sequences that do not form
/// valid UTF-8 pass through untouched.
fn percent_decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string())
}
