//! URL helpers for allow-list and classification lookups
//!
//! These functions work directly on string slices. Callers only ever need the
//! host of a URL, so no full URL parser is involved.

// =============================================================================
// Scheme Handling
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    let colon_pos = bytes.iter().position(|&b| b == b':')?;
    if colon_pos == 0 || !bytes[..colon_pos].iter().all(is_scheme_char) {
        return None;
    }

    if bytes.len() > colon_pos + 2
        && bytes[colon_pos + 1] == b'/'
        && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    None
}

#[inline]
fn is_scheme_char(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || *b == b'+' || *b == b'-' || *b == b'.'
}

/// Replace the scheme of a URL with `http`.
///
/// Classification only cares about the host, so candidate URLs reported by
/// pages are normalized before lookup. Returns `None` for URLs without an
/// authority component.
pub fn with_http_scheme(url: &str) -> Option<String> {
    let scheme_end = get_scheme_end(url)?;
    Some(format!("http://{}", &url[scheme_end..]))
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    // IPv6 literals keep their colons; the host runs through the closing bracket
    let mut scan_from = host_start;
    if bytes.get(host_start) == Some(&b'[') {
        scan_from = match bytes[host_start..].iter().position(|&b| b == b']') {
            Some(close) => host_start + close + 1,
            None => return None,
        };
    }

    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(scan_from) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Lowercased, non-empty host of a URL.
///
/// This is the single place hosts are standardized for allow-listing and
/// classification, so both sides agree on the same key.
pub fn normalized_host(url: &str) -> Option<String> {
    let host = extract_host(url)?.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}
