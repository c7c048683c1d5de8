use super::document::{DocumentId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte range (and page, when known) inside a document version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Location {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice the located bytes out of `content`, if the range is valid
    pub fn slice<'a>(&self, content: &'a [u8]) -> Option<&'a [u8]> {
        if self.start <= self.end && self.end <= content.len() {
            Some(&content[self.start..self.end])
        } else {
            None
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "page {}, bytes {}-{}", page, self.start, self.end),
            None => write!(f, "bytes {}-{}", self.start, self.end),
        }
    }
}

/// Citation in a synthesized answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation index (1-based) as used in `[n]` markers
    pub index: usize,

    pub document: DocumentId,

    pub version: Version,

    /// Document display name
    pub title: String,

    pub location: Location,

    /// Quoted text (truncated)
    pub quote: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_rejects_out_of_range() {
        let content = b"Acme Corp was screened";
        let ok = Location { start: 0, end: 9, page: None };
        assert_eq!(ok.slice(content), Some(&b"Acme Corp"[..]));

        let bad = Location { start: 5, end: 500, page: None };
        assert_eq!(bad.slice(content), None);
    }

    #[test]
    fn test_display_with_page() {
        let loc = Location { start: 10, end: 20, page: Some(2) };
        assert_eq!(loc.to_string(), "page 2, bytes 10-20");
    }
}
