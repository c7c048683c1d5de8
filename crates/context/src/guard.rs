//! Input guard - screens questions for injection payloads
//!
//! A question matching any pattern is answered with [`REFUSAL_MESSAGE`] and
//! never reaches a backend or the language model.

use integrity_common::errors::{AppError, Result};
use regex_lite::Regex;
use tracing::warn;

/// Fixed answer for rejected questions and model refusals
pub const REFUSAL_MESSAGE: &str =
    "I'm sorry, but I cannot assist with that request. Please rephrase your question or ask about a different topic.";

const PATTERNS: &[(&str, &str)] = &[
    (
        "sql_injection",
        r"(?is)(\bselect\s+.+\s+from\b)|(\binsert\s+into\b)|(\bupdate\s+\w+\s+set\b)|(\bdelete\s+from\b)|(\bdrop\s+(table|database)\b)|(\balter\s+table\b)|(\bunion\s+(all\s+)?select\b)|(\bselect\s+\*)|('\s*(or|and)\s*\w+\s*[=<>]\s*\w+)|(--|/\*|\*/)",
    ),
    (
        "command_injection",
        r"(?i)(;|\||&|\$\(|`)\s*(cat|nc|netcat|wget|curl|ping|rm|ls|whoami|id|sudo|chmod|chown|sh|bash)\b",
    ),
    (
        "code_injection",
        r#"(?i)(<\s*script.*?>)|(<\s*/\s*script)|(javascript:|vbscript:)|(on(load|error|click|mouseover)\s*=)|("__proto__"\s*:)|(import\s+os|import\s+sys|subprocess\.)"#,
    ),
    (
        "template_injection",
        r"(?is)(\{\{.*?\}\})|(\{%.*?%\})|(\$\{[^}]*\})|(<%.*?%>)|(__class__|__mro__|__subclasses__|__init__|__globals__)",
    ),
    (
        "crlf_injection",
        r"(?i)(\r\n|\r|\n|%0a|%0d).*(content-type:|bcc:|cc:|to:|subject:|location:)",
    ),
    (
        "privilege_escalation",
        r#"(?i)\{[^}]*["'](role|permission|access|user|username)["']\s*:\s*["']?(admin|superuser|root|administrator)["']?|\{[^}]*["'](admin|superuser)["']\s*:|\{[^}]*["'](isadmin|is_admin|issuperuser|is_superuser|isauthenticated)["']\s*:\s*(true|1)"#,
    ),
];

/// Compiled injection patterns
pub struct InputGuard {
    patterns: Vec<(&'static str, Regex)>,
    enabled: bool,
}

impl InputGuard {
    pub fn new(enabled: bool) -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|(name, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*name, re))
                    .map_err(|e| AppError::Configuration {
                        message: format!("invalid {} pattern: {}", name, e),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns, enabled })
    }

    /// Name of the first matching pattern, if any
    pub fn detect(&self, input: &str) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(input))
            .map(|(name, _)| *name)
    }

    /// Reject the input with the refusal message when a pattern matches
    pub fn screen(&self, input: &str) -> Result<()> {
        match self.detect(input) {
            Some(pattern) => {
                warn!(pattern, "Injection pattern detected in question");
                Err(AppError::InputRejected {
                    reason: REFUSAL_MESSAGE.to_string(),
                })
            }
            None => Ok(()),
        }
    }
}
