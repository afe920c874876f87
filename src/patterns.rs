use regex::Regex;
use tracing::error;

/// Compiled commit-message patterns for one source, OR semantics
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

/// A pattern that failed to compile
#[derive(Debug, Clone)]
pub struct InvalidPattern {
    pub pattern: String,
    pub reason: String,
}

impl PatternSet {
    /// Compile every pattern, keeping the ones that are valid.
    ///
    /// Invalid patterns are logged and returned so the caller can report them;
    /// they never match.
    pub fn compile(patterns: &[String]) -> (Self, Vec<InvalidPattern>) {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut invalid = Vec::new();

        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(re) => compiled.push(re),
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "Invalid pattern, skipping");
                    invalid.push(InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (Self { patterns: compiled }, invalid)
    }

    /// True if any pattern occurs anywhere in `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One-shot match of `text` against uncompiled patterns
pub fn matches(text: &str, patterns: &[String]) -> bool {
    PatternSet::compile(patterns).0.is_match(text)
}
