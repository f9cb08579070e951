//! Host substitution in request URLs.

use url::Url;

/// Replaces the first textual occurrence of `host` in `url` with `new_host`
/// and re-parses the result.
///
/// Only the first match is touched. The authority precedes path and query in
/// a URL's string form, so the first match is the host itself even when the
/// same text recurs later. Returns `None` if `host` does not occur or the
/// rewritten string is not a valid URL.
pub fn replace_host(url: &Url, host: &str, new_host: &str) -> Option<Url> {
    if host.is_empty() || !url.as_str().contains(host) {
        return None;
    }
    Url::parse(&url.as_str().replacen(host, new_host, 1)).ok()
}

/// Swaps the URL's own host for `new_host`.
pub fn rewrite_host(url: &Url, new_host: &str) -> Option<Url> {
    let host = url.host_str()?;
    replace_host(url, host, new_host)
}
