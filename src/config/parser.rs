use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use shiori::config::load_config;
///
/// let config = load_config(Path::new("shiori.toml")).unwrap();
/// println!("Books: {}", config.books.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Each crawl run records this hash so a later `--stats` call can tell which
/// configuration produced it.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_CONFIG: &str = r#"
[crawler]
retry-budget = 2
chapter-timeout = 30000
request-delay = 250
host-parallelism = 2

[output]
database-path = "./test.db"

[[book]]
name = "Moonlit Archive"
toc-url = "https://novels.example.com/book/42"
text-dir = "./out/text"
image-dir = "./out/images"
retry-budget = 5

[book.headers]
Referer = "https://novels.example.com/"

[book.selectors]
chapter-link = "ul.chapters a"
chapter-title = "h1"
content = "div#content"
next-page = "a.next"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.retry_budget, 2);
        assert_eq!(config.crawler.asset_workers, 4);
        assert_eq!(config.books.len(), 1);

        let book = &config.books[0];
        assert_eq!(book.name, "Moonlit Archive");
        assert_eq!(
            book.headers.get("Referer").map(String::as_str),
            Some("https://novels.example.com/")
        );
        assert_eq!(book.selectors.content, "div#content");
        assert!(book.selectors.volume.is_none());
    }

    #[test]
    fn test_book_settings_merge_overrides() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();
        let settings = config.books[0].settings(&config.crawler);

        assert_eq!(settings.retry_budget, 5);
        assert_eq!(settings.chapter_timeout, Duration::from_secs(30));
        assert_eq!(settings.request_delay, Duration::from_millis(250));
        assert_eq!(settings.host_parallelism, 2);
        assert!(!settings.ignore_failed);
    }

    #[test]
    fn test_crawler_section_is_optional() {
        let content = r#"
[output]
database-path = "./test.db"

[[book]]
name = "Short"
toc-url = "https://example.com/toc"
text-dir = "./text"
image-dir = "./images"

[book.selectors]
chapter-link = "a"
content = "article"
"#;
        let file = create_temp_config(content);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.crawler.retry_budget, 3);
        assert_eq!(config.crawler.chapter_timeout, 60_000);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/shiori.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = VALID_CONFIG.replace("host-parallelism = 2", "host-parallelism = 0");
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
