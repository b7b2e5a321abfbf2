use crate::config::types::{BookConfig, Config, CrawlerConfig, OutputConfig, SelectorConfig};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

const MAX_RETRY_BUDGET: u32 = 10;
const MIN_CHAPTER_TIMEOUT_MS: u64 = 100;
const MAX_PARALLELISM: u32 = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    validate_books(&config.books)?;
    Ok(())
}

/// Validates crawl-wide defaults
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_retry_budget(config.retry_budget)?;
    validate_chapter_timeout(config.chapter_timeout)?;
    validate_parallelism("host_parallelism", config.host_parallelism)?;
    validate_parallelism("asset_workers", config.asset_workers)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_budget(budget: u32) -> Result<(), ConfigError> {
    if budget > MAX_RETRY_BUDGET {
        return Err(ConfigError::Validation(format!(
            "retry_budget must be <= {}, got {}",
            MAX_RETRY_BUDGET, budget
        )));
    }
    Ok(())
}

fn validate_chapter_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
    if timeout_ms < MIN_CHAPTER_TIMEOUT_MS {
        return Err(ConfigError::Validation(format!(
            "chapter_timeout must be >= {}ms, got {}ms",
            MIN_CHAPTER_TIMEOUT_MS, timeout_ms
        )));
    }
    Ok(())
}

fn validate_parallelism(name: &str, value: u32) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_PARALLELISM {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_PARALLELISM, value
        )));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates book entries
fn validate_books(books: &[BookConfig]) -> Result<(), ConfigError> {
    if books.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[book]] entry is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for book in books {
        if book.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "book name cannot be empty".to_string(),
            ));
        }

        if !names.insert(book.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate book name '{}'",
                book.name
            )));
        }

        let url = Url::parse(&book.toc_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid toc-url '{}': {}", book.toc_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "toc-url '{}' must use http or https",
                book.toc_url
            )));
        }

        if book.text_dir.as_os_str().is_empty() || book.image_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "book '{}' needs both text-dir and image-dir",
                book.name
            )));
        }

        if let Some(budget) = book.retry_budget {
            validate_retry_budget(budget)?;
        }
        if let Some(timeout) = book.chapter_timeout {
            validate_chapter_timeout(timeout)?;
        }
        if let Some(parallelism) = book.host_parallelism {
            validate_parallelism("host_parallelism", parallelism)?;
        }

        validate_selectors(&book.selectors)?;
    }

    Ok(())
}

/// Checks that every configured selector parses
fn validate_selectors(selectors: &SelectorConfig) -> Result<(), ConfigError> {
    let required = [&selectors.chapter_link, &selectors.content];
    for selector in required {
        validate_selector(selector)?;
    }

    let optional = [
        &selectors.volume,
        &selectors.volume_title,
        &selectors.volume_listing,
        &selectors.chapter_title,
        &selectors.next_page,
        &selectors.next_chapter,
        &selectors.image,
    ];
    for selector in optional.into_iter().flatten() {
        validate_selector(selector)?;
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}
