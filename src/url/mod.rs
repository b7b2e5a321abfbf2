//! URL handling for Shiori
//!
//! Record-store keys are canonical URLs so that the same chapter reached
//! through cosmetically different links maps to one completion record.

mod normalize;

pub use normalize::canonical_url;

use url::Url;

/// Returns the lowercase host (with port, when present) used to key the
/// per-host rate limiter.
///
/// # Examples
///
/// ```
/// use shiori::url::host_of;
/// use url::Url;
///
/// let url = Url::parse("https://Example.com:8443/chapter/1").unwrap();
/// assert_eq!(host_of(&url), "example.com:8443");
/// ```
pub fn host_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_without_port() {
        let url = Url::parse("https://novels.example.org/toc").unwrap();
        assert_eq!(host_of(&url), "novels.example.org");
    }

    #[test]
    fn test_default_port_is_omitted() {
        let url = Url::parse("https://example.com:443/toc").unwrap();
        assert_eq!(host_of(&url), "example.com");
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let url = Url::parse("http://127.0.0.1:39001/toc").unwrap();
        assert_eq!(host_of(&url), "127.0.0.1:39001");
    }
}
