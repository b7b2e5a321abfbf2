//! Structured extraction from fetched pages
//!
//! The crawler never looks at HTML itself. It hands fetched pages to an
//! [`Extractor`] and gets typed results back:
//! - table of contents: volumes with chapter entries and optional listing links
//! - volume listing: chapter entries of one volume
//! - chapter page: title, content, next-page and next-chapter links, assets
//!
//! [`SelectorExtractor`] is the configuration-driven implementation built from
//! a book's CSS selectors.

use crate::config::SelectorConfig;
use crate::crawler::fetcher::FetchResponse;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// Why a page could not be turned into a structured result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no chapters found in table of contents at {url}")]
    EmptyTableOfContents { url: String },

    #[error("page at {url} is not HTML (content type {content_type})")]
    NotHtml { url: String, content_type: String },
}

/// A chapter as listed on a table of contents or volume listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    pub title: String,
    /// `None` when the listing shows the chapter without a usable link
    pub url: Option<Url>,
}

/// One volume of a table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeListing {
    pub title: String,
    /// Separate page listing the volume's chapters, if the TOC links one
    pub listing_url: Option<Url>,
    pub chapters: Vec<ChapterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableOfContents {
    pub volumes: Vec<VolumeListing>,
}

impl TableOfContents {
    /// Total chapter entries across all volumes
    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|v| v.chapters.len()).sum()
    }
}

/// Everything extracted from one chapter page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageExtract {
    pub title: Option<String>,
    /// Content HTML; empty when nothing matched
    pub content: String,
    pub next_page: Option<Url>,
    pub next_chapter: Option<Url>,
    /// Absolute asset URLs in document order, deduplicated
    pub assets: Vec<Url>,
}

/// The extraction seam between the crawler and site structure
pub trait Extractor: Send + Sync {
    fn table_of_contents(&self, page: &FetchResponse) -> Result<TableOfContents, ExtractError>;

    fn volume_listing(&self, page: &FetchResponse) -> Result<Vec<ChapterEntry>, ExtractError>;

    fn chapter_page(&self, page: &FetchResponse) -> Result<PageExtract, ExtractError>;
}

/// CSS-selector driven extractor
#[derive(Debug)]
pub struct SelectorExtractor {
    volume: Option<Selector>,
    volume_title: Option<Selector>,
    volume_listing: Option<Selector>,
    chapter_link: Selector,
    chapter_title: Option<Selector>,
    content: Selector,
    next_page: Option<Selector>,
    next_chapter: Option<Selector>,
    image: Option<Selector>,
}

impl SelectorExtractor {
    /// Compiles every selector of a book once
    ///
    /// # Arguments
    ///
    /// * `selectors` - The book's selector configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorExtractor)` - All selectors compiled
    /// * `Err(ConfigError::InvalidSelector)` - A selector failed to parse
    pub fn new(selectors: &SelectorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            volume: compile_optional(&selectors.volume)?,
            volume_title: compile_optional(&selectors.volume_title)?,
            volume_listing: compile_optional(&selectors.volume_listing)?,
            chapter_link: compile(&selectors.chapter_link)?,
            chapter_title: compile_optional(&selectors.chapter_title)?,
            content: compile(&selectors.content)?,
            next_page: compile_optional(&selectors.next_page)?,
            next_chapter: compile_optional(&selectors.next_chapter)?,
            image: compile_optional(&selectors.image)?,
        })
    }

    fn chapter_entries(&self, scope: ElementRef<'_>, base: &Url) -> Vec<ChapterEntry> {
        scope
            .select(&self.chapter_link)
            .map(|link| ChapterEntry {
                title: element_text(&link),
                url: link.value().attr("href").and_then(|h| resolve_link(h, base)),
            })
            .collect()
    }

    fn volume_title(&self, scope: ElementRef<'_>, index: usize) -> String {
        self.volume_title
            .as_ref()
            .and_then(|selector| scope.select(selector).next())
            .map(|element| element_text(&element))
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| format!("Volume {}", index + 1))
    }
}

impl Extractor for SelectorExtractor {
    fn table_of_contents(&self, page: &FetchResponse) -> Result<TableOfContents, ExtractError> {
        ensure_html(page)?;
        let document = Html::parse_document(&page.text());
        let base = &page.url;
        let root = document.root_element();

        let volumes: Vec<VolumeListing> = match &self.volume {
            Some(volume_selector) => root
                .select(volume_selector)
                .enumerate()
                .map(|(index, volume)| VolumeListing {
                    title: self.volume_title(volume, index),
                    listing_url: first_link(volume, self.volume_listing.as_ref(), base),
                    chapters: self.chapter_entries(volume, base),
                })
                .collect(),
            None => vec![VolumeListing {
                title: self.volume_title(root, 0),
                listing_url: None,
                chapters: self.chapter_entries(root, base),
            }],
        };

        let toc = TableOfContents { volumes };
        let has_listing = toc.volumes.iter().any(|v| v.listing_url.is_some());
        if toc.chapter_count() == 0 && !has_listing {
            return Err(ExtractError::EmptyTableOfContents {
                url: base.to_string(),
            });
        }

        tracing::debug!(
            "Extracted {} volume(s), {} chapter(s) from {}",
            toc.volumes.len(),
            toc.chapter_count(),
            base
        );

        Ok(toc)
    }

    fn volume_listing(&self, page: &FetchResponse) -> Result<Vec<ChapterEntry>, ExtractError> {
        ensure_html(page)?;
        let document = Html::parse_document(&page.text());
        Ok(self.chapter_entries(document.root_element(), &page.url))
    }

    fn chapter_page(&self, page: &FetchResponse) -> Result<PageExtract, ExtractError> {
        ensure_html(page)?;
        let document = Html::parse_document(&page.text());
        let base = &page.url;
        let root = document.root_element();

        let title = self
            .chapter_title
            .as_ref()
            .and_then(|selector| root.select(selector).next())
            .map(|element| element_text(&element))
            .filter(|title| !title.is_empty());

        let content = root
            .select(&self.content)
            .map(|element| element.inner_html().trim().to_string())
            .filter(|html| !html.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut assets: Vec<Url> = Vec::new();
        if let Some(image) = &self.image {
            for element in root.select(image) {
                let src = element
                    .value()
                    .attr("src")
                    .and_then(|src| resolve_link(src, base))
                    .or_else(|| {
                        element
                            .value()
                            .attr("data-src")
                            .and_then(|src| resolve_link(src, base))
                    });
                if let Some(src) = src {
                    if !assets.contains(&src) {
                        assets.push(src);
                    }
                }
            }
        }

        Ok(PageExtract {
            title,
            content,
            next_page: first_link(root, self.next_page.as_ref(), base),
            next_chapter: first_link(root, self.next_chapter.as_ref(), base),
            assets,
        })
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

fn compile_optional(selector: &Option<String>) -> Result<Option<Selector>, ConfigError> {
    selector.as_deref().map(compile).transpose()
}

/// Refuses bodies that declare a non-HTML content type
fn ensure_html(page: &FetchResponse) -> Result<(), ExtractError> {
    match page.content_type() {
        Some(content_type)
            if !content_type.contains("html") && !content_type.starts_with("text/plain") =>
        {
            Err(ExtractError::NotHtml {
                url: page.url.to_string(),
                content_type: content_type.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Whitespace-normalized text of an element
fn element_text(element: &ElementRef<'_>) -> String {
    let text = element.text().collect::<Vec<_>>().join(" ");
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_link(scope: ElementRef<'_>, selector: Option<&Selector>, base: &Url) -> Option<Url> {
    let selector = selector?;
    scope
        .select(selector)
        .filter_map(|element| element.value().attr("href"))
        .find_map(|href| resolve_link(href, base))
}

/// Resolves an href against the page URL
///
/// Returns None if the link is unusable:
/// - empty or fragment-only
/// - javascript:, mailto:, tel:, data: schemes
/// - non-HTTP(S) after resolution
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}
