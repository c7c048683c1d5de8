//! Text helpers shared by the router, enricher and synthesizer

use std::borrow::Cow;

/// Form feed separates pages in extracted document text
pub const PAGE_BREAK: char = '\u{000C}';

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those",
    "it", "its", "as", "do", "does", "did", "has", "have", "had", "can", "could", "will",
    "would", "should", "may", "might", "any", "there", "other", "what", "which", "who", "whom",
    "about", "ever", "previously", "we", "our", "us",
];

/// Rough estimate: 1 token ~= 4 characters, never zero for non-empty text
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Lowercase, drop punctuation and collapse whitespace
pub fn normalize_phrase(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized title used as the cross-backend dedup key
pub fn normalize_title(title: &str) -> String {
    const EXTENSIONS: &[&str] = &[".pdf", ".docx", ".doc", ".txt", ".msg", ".xlsx", ".html"];
    let trimmed = title.trim();
    let lower = trimmed.to_lowercase();
    let stem = EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &trimmed[..trimmed.len() - ext.len()])
        .unwrap_or(trimmed);
    normalize_phrase(stem)
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Content terms of a text: normalized words longer than two characters
pub fn terms(text: &str) -> Vec<String> {
    normalize_phrase(text)
        .split(' ')
        .filter(|w| w.len() > 2 && !is_stop_word(w))
        .map(str::to_string)
        .collect()
}

/// 1-based page containing byte `offset`
pub fn page_at(text: &str, offset: usize) -> Option<u32> {
    if !text.contains(PAGE_BREAK) {
        return None;
    }
    let end = offset.min(text.len());
    let breaks = text.as_bytes()[..end].iter().filter(|b| **b == 0x0C).count();
    Some(breaks as u32 + 1)
}

/// Take at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Content decoded as UTF-8 with invalid sequences replaced by U+FFFD
///
/// Offsets found in the decoded text map back to byte offsets in the raw
/// content, so citations point into the bytes the backend served.
#[derive(Debug, Clone)]
pub struct DecodedText<'a> {
    text: Cow<'a, str>,
    replaced: Vec<Replacement>,
}

/// One invalid raw run and where its replacement character sits
#[derive(Debug, Clone, Copy)]
struct Replacement {
    decoded: usize,
    raw: usize,
    raw_len: usize,
}

const REPLACEMENT_LEN: usize = char::REPLACEMENT_CHARACTER.len_utf8();

pub fn decode_lossy(bytes: &[u8]) -> DecodedText<'_> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: Cow::Borrowed(text),
            replaced: Vec::new(),
        };
    }

    let mut text = String::with_capacity(bytes.len() + REPLACEMENT_LEN);
    let mut replaced = Vec::new();
    let mut raw = 0;
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                let invalid = e.error_len().unwrap_or(rest.len() - valid);
                raw += valid;
                replaced.push(Replacement {
                    decoded: text.len(),
                    raw,
                    raw_len: invalid,
                });
                text.push(char::REPLACEMENT_CHARACTER);
                raw += invalid;
                rest = &rest[valid + invalid..];
            }
        }
    }
    DecodedText {
        text: Cow::Owned(text),
        replaced,
    }
}

impl DecodedText<'_> {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the raw content was valid UTF-8
    pub fn is_exact(&self) -> bool {
        self.replaced.is_empty()
    }

    /// Raw byte offset of a decoded offset
    ///
    /// An offset inside a replacement character maps to the end of the
    /// invalid run it stands for.
    pub fn raw_offset(&self, decoded: usize) -> usize {
        let before = self.replaced.partition_point(|r| r.decoded < decoded);
        let Some(r) = before.checked_sub(1).map(|i| self.replaced[i]) else {
            return decoded;
        };
        let after = r.decoded + REPLACEMENT_LEN;
        let raw_end = r.raw + r.raw_len;
        raw_end + decoded.saturating_sub(after)
    }

    /// Decoded offset of a raw byte offset
    ///
    /// `None` when `raw` falls inside an invalid run or is not a character
    /// boundary of the decoded text.
    pub fn decoded_offset(&self, raw: usize) -> Option<usize> {
        let before = self.replaced.partition_point(|r| r.raw < raw);
        let decoded = match before.checked_sub(1).map(|i| self.replaced[i]) {
            None => raw,
            Some(r) => {
                let raw_end = r.raw + r.raw_len;
                if raw < raw_end {
                    return None;
                }
                r.decoded + REPLACEMENT_LEN + (raw - raw_end)
            }
        };
        (decoded <= self.text.len() && self.text.is_char_boundary(decoded)).then_some(decoded)
    }
}

/// All ASCII-case-insensitive, word-bounded occurrences of `needle`
///
/// Returns byte ranges into `haystack`.
pub fn find_word_ci(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    let mut found = Vec::new();
    if pat.is_empty() || pat.len() > hay.len() {
        return found;
    }
    let mut i = 0;
    while i + pat.len() <= hay.len() {
        if haystack.is_char_boundary(i)
            && haystack.is_char_boundary(i + pat.len())
            && hay[i..i + pat.len()].eq_ignore_ascii_case(pat)
        {
            let before_ok = i == 0 || !hay[i - 1].is_ascii_alphanumeric();
            let after = i + pat.len();
            let after_ok = after == hay.len() || !hay[after].is_ascii_alphanumeric();
            if before_ok && after_ok {
                found.push((i, after));
                i = after;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Split text into sentence byte ranges
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or end of text,
/// or at a line break. Trailing citation markers such as ` [2]` directly after
/// the terminator stay with the sentence they follow.
pub fn split_sentences(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let terminator = matches!(b, b'.' | b'!' | b'?');
        let line_break = b == b'\n' || b == 0x0C;
        if terminator
            && (i + 1 == bytes.len() || bytes[i + 1].is_ascii_whitespace() || bytes[i + 1] == b'[')
            && !(b == b'.' && continues_after_abbreviation(&text[start..i], &text[i + 1..]))
        {
            let mut end = i + 1;
            end = absorb_markers(bytes, end);
            push_trimmed(text, start, end, &mut sentences);
            start = end;
            i = end;
            continue;
        }
        if line_break {
            push_trimmed(text, start, i, &mut sentences);
            start = i + 1;
        }
        i += 1;
    }
    push_trimmed(text, start, bytes.len(), &mut sentences);
    sentences
}

/// A period after an abbreviation does not end the sentence
///
/// Titles and Latin abbreviations never end one. A company or numbering
/// suffix ends one unless the next word starts lowercase, with a digit, or is
/// itself a company suffix ("Acme Co. Ltd.").
fn continues_after_abbreviation(prefix: &str, rest: &str) -> bool {
    const ALWAYS: &[&str] = &["mr", "ms", "mrs", "dr", "e.g", "i.e"];
    const SUFFIXES: &[&str] = &["corp", "inc", "ltd", "co", "llc", "plc", "no", "st", "vs"];
    let last = prefix
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    if ALWAYS.iter().any(|a| last.eq_ignore_ascii_case(a)) {
        return true;
    }
    if !SUFFIXES.iter().any(|a| last.eq_ignore_ascii_case(a)) {
        return false;
    }

    let next = rest.trim_start();
    match next.chars().next() {
        Some(c) if c.is_lowercase() || c.is_ascii_digit() => true,
        Some(c) if c.is_uppercase() => {
            let word: String = next
                .chars()
                .take_while(|c| c.is_alphanumeric())
                .collect();
            SUFFIXES[..6].iter().any(|a| word.eq_ignore_ascii_case(a))
        }
        _ => false,
    }
}

fn absorb_markers(bytes: &[u8], mut end: usize) -> usize {
    loop {
        let mut j = end;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'[' {
            let mut k = j + 1;
            while k < bytes.len() && (bytes[k].is_ascii_digit() || bytes[k] == b',' || bytes[k] == b' ') {
                k += 1;
            }
            if k < bytes.len() && bytes[k] == b']' && k > j + 1 {
                end = k + 1;
                continue;
            }
        }
        return end;
    }
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    let (s, e) = (start + lead, end - trail);
    if s < e {
        out.push((s, e));
    }
}
