//! Text conventions of the wrapped debugger: prompt shapes and the
//! completion-marker echo instruction

use regex::Regex;
use uuid::Uuid;

use super::error::DebuggerError;

const MARKER_PLACEHOLDER: &str = "{marker}";
const MARKER_PREFIX: &str = "DBGSHELL_EOC_";

/// Generate a completion marker that will not occur in real debugger output
pub fn generate_marker() -> String {
    format!("{}{}", MARKER_PREFIX, Uuid::new_v4().simple())
}

/// Whether `text` carries a completion marker (or its echo instruction)
pub fn contains_marker(text: &str) -> bool {
    text.contains(MARKER_PREFIX)
}

/// How a command is followed by the "print this literal" instruction
#[derive(Debug, Clone)]
pub struct MarkerProtocol {
    separator: String,
    echo_template: String,
}

impl MarkerProtocol {
    /// `echo_template` must contain `{marker}`, e.g. `.echo {marker}` for cdb
    pub fn new(
        separator: impl Into<String>,
        echo_template: impl Into<String>,
    ) -> Result<Self, DebuggerError> {
        let echo_template = echo_template.into();
        if !echo_template.contains(MARKER_PLACEHOLDER) {
            return Err(DebuggerError::InvalidSettings(format!(
                "echo template '{}' has no {} placeholder",
                echo_template, MARKER_PLACEHOLDER
            )));
        }

        Ok(Self {
            separator: separator.into(),
            echo_template,
        })
    }

    /// Instruction that makes the debugger print `marker`
    pub fn echo_instruction(&self, marker: &str) -> String {
        self.echo_template.replace(MARKER_PLACEHOLDER, marker)
    }

    /// Full line written to stdin, without the trailing newline
    pub fn render(&self, command: &str, marker: &str) -> String {
        format!(
            "{}{}{}",
            command.trim_end(),
            self.separator,
            self.echo_instruction(marker)
        )
    }
}

/// Recognizes interactive prompts such as `0:000>` or `0: kd>`
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    patterns: Vec<Regex>,
}

impl PromptMatcher {
    pub const DEFAULT_PATTERN: &'static str = r"\d+:\s?\w+(?::\w+)?>";

    pub fn new<I, S>(patterns: I) -> Result<Self, DebuggerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|e| {
                    DebuggerError::InvalidSettings(format!(
                        "invalid prompt pattern '{}': {}",
                        pattern.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if patterns.is_empty() {
            return Err(DebuggerError::InvalidSettings(
                "at least one prompt pattern is required".to_string(),
            ));
        }

        Ok(Self { patterns })
    }

    /// Whether the text contains a prompt anywhere
    pub fn is_prompt(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(text))
    }

    /// Remove a prompt that starts the line
    pub fn strip_prompt<'a>(&self, line: &'a str) -> &'a str {
        let trimmed = line.trim_start();
        for pattern in &self.patterns {
            if let Some(found) = pattern.find(trimmed) {
                if found.start() == 0 {
                    let rest = &trimmed[found.end()..];
                    return rest.strip_prefix(' ').unwrap_or(rest);
                }
            }
        }
        line
    }
}

impl Default for PromptMatcher {
    fn default() -> Self {
        Self::new([Self::DEFAULT_PATTERN]).expect("default prompt pattern compiles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_unique_and_distinctive() {
        let first = generate_marker();
        let second = generate_marker();
        assert_ne!(first, second);
        assert!(first.starts_with(MARKER_PREFIX));
        assert!(first.len() > 40);
        assert!(contains_marker(&format!("0:000> {}", first)));
        assert!(!contains_marker("0:000> k"));
    }

    #[test]
    fn test_render_appends_echo_instruction() {
        let protocol = MarkerProtocol::new(";", ".echo {marker}").unwrap();
        assert_eq!(protocol.render("k", "M1"), "k;.echo M1");
        assert_eq!(protocol.render("lm  \n", "M2"), "lm;.echo M2");
    }

    #[test]
    fn test_template_requires_placeholder() {
        assert!(MarkerProtocol::new(";", ".echo done").is_err());
    }

    #[test]
    fn test_prompt_detection() {
        let prompt = PromptMatcher::default();
        assert!(prompt.is_prompt("0:000> "));
        assert!(prompt.is_prompt("1:023:x86> "));
        assert!(prompt.is_prompt("0: kd> "));
        assert!(!prompt.is_prompt("Loading Dump File [C:\\crash.dmp]"));
        assert!(!prompt.is_prompt("hello"));
    }

    #[test]
    fn test_strip_prompt_only_at_line_start() {
        let prompt = PromptMatcher::default();
        assert_eq!(prompt.strip_prompt("0:000> hello"), "hello");
        assert_eq!(prompt.strip_prompt("0:000> "), "");
        assert_eq!(prompt.strip_prompt("value is 0:000> here"), "value is 0:000> here");
        assert_eq!(prompt.strip_prompt("  indented"), "  indented");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(PromptMatcher::new(["("]).is_err());
        assert!(PromptMatcher::new(Vec::<String>::new()).is_err());
    }
}
