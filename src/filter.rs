use regex::Regex;

/// File names that must never be backed up.
///
/// Each pattern has to match the whole name, so `.*\.bak` excludes
/// `slot.bak` but not `slot.bak.old`.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    patterns: Vec<Regex>,
}

impl Blacklist {
    /// Compile a semicolon separated pattern list. Blank entries are skipped,
    /// invalid ones are logged and skipped.
    pub fn parse(patterns: &str) -> Self {
        let patterns = patterns
            .split(';')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .filter_map(|pattern| match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!("Ignoring invalid blacklist pattern '{}': {}", pattern, err);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_blacklisted(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(file_name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
