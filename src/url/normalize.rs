use crate::UrlError;
use url::Url;

/// Query parameters that never change which chapter a link points at
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "from",
    "ref",
    "source",
];

/// Builds the canonical form of a chapter or asset URL
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host
/// 3. Normalize the path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest by key
///
/// The scheme is kept as-is: some sources serve chapters over plain HTTP only.
///
/// # Examples
///
/// ```
/// use shiori::url::canonical_url;
///
/// let url = canonical_url("https://EXAMPLE.com/book/12/chapter-3/?utm_source=feed#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/book/12/chapter-3");
/// ```
pub fn canonical_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) => {
            let lowered = host.to_lowercase();
            url.set_host(Some(&lowered))
                .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
        }
        None => return Err(UrlError::MissingHost),
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Removes dot segments, repeated slashes and the trailing slash from a path
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Drops tracking parameters and sorts the remaining ones by key
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_preserved() {
        let result = canonical_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = canonical_url("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = canonical_url("https://example.com/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = canonical_url("https://example.com/page#comments").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_sort_query_params_and_drop_tracking() {
        let result =
            canonical_url("https://example.com/read?page=2&book=7&utm_medium=rss&from=index")
                .unwrap();
        assert_eq!(result.as_str(), "https://example.com/read?book=7&page=2");
    }

    #[test]
    fn test_only_tracking_params_removes_query() {
        let result = canonical_url("https://example.com/page?utm_source=a&fbclid=b").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_dot_segments_and_repeated_slashes() {
        let result = canonical_url("https://example.com//a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_lowercase_host_keeps_path_case() {
        let result = canonical_url("https://EXAMPLE.COM/Chapter").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Chapter");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = canonical_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(canonical_url("not a url").is_err());
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = canonical_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }
}
