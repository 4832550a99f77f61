use regex_lite::Regex;

/// Matches lines such as `Level 3` or `entering level 12`.
pub const DEFAULT_SCALAR_PATTERN: &str = r"(?i)\blevel\s+(\d+)\b";

/// Extracts a running counter from free text. The value only ever grows
/// within one session; a new session starts from a fresh tracker.
#[derive(Debug, Clone)]
pub struct ScalarTracker {
    pattern: Regex,
    current: i64,
}

impl ScalarTracker {
    /// `pattern` must contain at least one capture group; the first group is
    /// parsed as the observed value.
    pub fn new(pattern: &str, initial: i64) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            current: initial,
        })
    }

    pub fn observe(&mut self, line: &str) -> i64 {
        let observed = self
            .pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .and_then(|found| found.as_str().parse::<i64>().ok());
        if let Some(value) = observed {
            self.current = self.current.max(value);
        }
        self.current
    }

    pub fn current(&self) -> i64 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn carries_maximum_forward() {
        let mut tracker = ScalarTracker::new(DEFAULT_SCALAR_PATTERN, 1).expect("pattern");
        let observed: Vec<i64> = ["Level 3", "found sword", "Level 4", "back to level 2"]
            .iter()
            .map(|line| tracker.observe(line))
            .collect();
        assert_eq!(observed, vec![3, 3, 4, 4]);
    }

    #[test]
    fn requires_word_boundaries() {
        let mut tracker = ScalarTracker::new(DEFAULT_SCALAR_PATTERN, 1).expect("pattern");
        assert_eq!(tracker.observe("sublevel 9"), 1);
        assert_eq!(tracker.observe("LEVEL 7"), 7);
    }

    #[test]
    fn overflowing_numbers_are_ignored() {
        let mut tracker = ScalarTracker::new(DEFAULT_SCALAR_PATTERN, 2).expect("pattern");
        assert_eq!(tracker.observe("level 99999999999999999999999"), 2);
    }
}
