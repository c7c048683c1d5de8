//! Citation marker parsing and the grounding check

use integrity_common::errors::{AppError, Result};
use integrity_common::text::split_sentences;
use regex_lite::{Captures, Regex};
use std::collections::HashMap;

/// Verdict for one answer sentence
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceCheck {
    pub start: usize,
    pub end: usize,
    pub markers: Vec<usize>,
    pub grounded: bool,
}

/// Verdict for a whole answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingReport {
    pub sentences: Vec<SentenceCheck>,
}

impl GroundingReport {
    pub fn is_grounded(&self) -> bool {
        !self.sentences.is_empty() && self.sentences.iter().all(|s| s.grounded)
    }

    pub fn violations(&self) -> usize {
        self.sentences.iter().filter(|s| !s.grounded).count()
    }

    /// Grounded sentences of `text`, in order
    pub fn grounded_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.sentences
            .iter()
            .filter(|s| s.grounded)
            .map(|s| &text[s.start..s.end])
            .collect()
    }
}

/// `[n]` and `[n, m]` citation markers
pub struct CitationMarkers {
    pattern: Regex,
}

impl CitationMarkers {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").map_err(|e| AppError::Configuration {
            message: format!("invalid citation marker pattern: {}", e),
        })?;
        Ok(Self { pattern })
    }

    /// Every cited index in order of appearance, repeats included
    pub fn markers(&self, text: &str) -> Vec<usize> {
        self.pattern
            .captures_iter(text)
            .flat_map(|caps| parse_list(&caps[1]))
            .collect()
    }

    /// Every sentence needs at least one marker and every marker must be a
    /// known index
    pub fn check(&self, text: &str, is_known: impl Fn(usize) -> bool) -> GroundingReport {
        let sentences = split_sentences(text)
            .into_iter()
            .filter(|&(s, e)| has_content(&self.pattern.replace_all(&text[s..e], "")))
            .map(|(start, end)| {
                let markers = self.markers(&text[start..end]);
                let grounded = !markers.is_empty() && markers.iter().all(|&m| is_known(m));
                SentenceCheck {
                    start,
                    end,
                    markers,
                    grounded,
                }
            })
            .collect();
        GroundingReport { sentences }
    }

    /// Old index -> dense new index, in order of first appearance
    pub fn dense_mapping(&self, text: &str) -> Vec<(usize, usize)> {
        let mut mapping: Vec<(usize, usize)> = Vec::new();
        for old in self.markers(text) {
            if !mapping.iter().any(|(o, _)| *o == old) {
                mapping.push((old, mapping.len() + 1));
            }
        }
        mapping
    }

    /// Rewrite markers through `mapping`; unmapped indices are dropped
    pub fn renumber(&self, text: &str, mapping: &HashMap<usize, usize>) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let mapped: Vec<String> = parse_list(&caps[1])
                    .into_iter()
                    .filter_map(|old| mapping.get(&old))
                    .map(|new| new.to_string())
                    .collect();
                if mapped.is_empty() {
                    String::new()
                } else {
                    format!("[{}]", mapped.join(", "))
                }
            })
            .into_owned()
    }
}

fn parse_list(list: &str) -> Vec<usize> {
    list.split(',').filter_map(|n| n.trim().parse().ok()).collect()
}

fn has_content(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}
