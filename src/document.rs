//! Page-based document text and the [`PageSource`] capability.
//!
//! Text extraction from real formats happens elsewhere; the tree builder only
//! needs to ask for the text of a page range. [`Document`] is the in-memory
//! implementation used by the CLI and tests. Page numbers shown to users are
//! 1-indexed, ranges passed to [`PageSource`] are 0-based and half-open.

use crate::error::{PageTreeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Form feed, the page separator emitted by most PDF-to-text tools.
pub const DEFAULT_PAGE_DELIMITER: &str = "\x0c";

/// Supplies document text by page range.
pub trait PageSource: Send + Sync {
    /// Total number of pages available.
    fn page_count(&self) -> usize;

    /// Text of pages `[start, end)`. Fails with `RangeUnavailable` if any page is missing.
    fn text_for_range(&self, start: usize, end: usize) -> Result<String>;
}

/// A single page in a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub number: usize,
    /// Text content of the page.
    pub content: String,
}

impl Page {
    /// Create a new page.
    pub fn new(number: usize, content: String) -> Self {
        Self { number, content }
    }
}

/// A document consisting of one or more pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document name/title.
    pub name: String,
    /// Original file path (if loaded from file).
    pub path: Option<PathBuf>,
    /// Pages in the document.
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a new document with given name and pages.
    pub fn new(name: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            name: name.into(),
            path: None,
            pages,
        }
    }

    /// Build a document from page texts, numbering them from 1.
    pub fn from_pages<I, S>(name: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, s)| Page::new(i + 1, s.into()))
            .collect();
        Self::new(name, pages)
    }

    /// Load a text file as a single-page document.
    pub fn from_text_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PageTreeError::io(path, e))?;

        Ok(Self {
            name: file_stem(path),
            path: Some(path.to_path_buf()),
            pages: vec![Page::new(1, content)],
        })
    }

    /// Load a text file with custom page delimiter.
    ///
    /// Splits content on the delimiter and treats each non-blank part as a page.
    pub fn from_text_file_with_delimiter(path: &Path, delimiter: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PageTreeError::io(path, e))?;

        let pages: Vec<Page> = content
            .split(delimiter)
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, s)| Page::new(i + 1, s.to_string()))
            .collect();

        if pages.is_empty() {
            return Err(PageTreeError::InvalidConfiguration(format!(
                "'{}' contains no pages",
                path.display()
            )));
        }

        Ok(Self {
            name: file_stem(path),
            path: Some(path.to_path_buf()),
            pages,
        })
    }

    /// Get total number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get a specific page by number (1-indexed).
    pub fn get_page(&self, number: usize) -> Option<&Page> {
        if number == 0 || number > self.pages.len() {
            None
        } else {
            Some(&self.pages[number - 1])
        }
    }
}

impl PageSource for Document {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn text_for_range(&self, start: usize, end: usize) -> Result<String> {
        if start >= end || end > self.pages.len() {
            return Err(PageTreeError::RangeUnavailable {
                start,
                end,
                total: self.pages.len(),
            });
        }

        Ok(self.pages[start..end]
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}
