//! Interfaces to services owned by someone else: object storage and the
//! content-moderation checker.

/// Object storage. Only opaque keys are stored in the database; a key is
/// turned into a fetchable URL after access has been checked.
pub trait MediaStore: Send + Sync {
    fn url_for(&self, storage_key: &str) -> String;

    fn delete(&self, storage_key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Flagged(String),
}

/// Judges user-written text. A flagged verdict becomes an automated warning.
pub trait ContentChecker: Send + Sync {
    fn check(&self, text: &str) -> Verdict;
}

/// Flags text containing any configured word, ignoring case. Matches whole
/// words only, so "class" does not trip on "ass".
#[derive(Debug, Clone, Default)]
pub struct KeywordChecker {
    words: Vec<String>,
}

impl KeywordChecker {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }
}

impl ContentChecker for KeywordChecker {
    fn check(&self, text: &str) -> Verdict {
        if self.words.is_empty() {
            return Verdict::Clean;
        }
        let lowered = text.to_lowercase();
        let hit = lowered
            .split(|c: char| !c.is_alphanumeric())
            .find(|token| self.words.iter().any(|w| w == token));
        match hit {
            Some(word) => Verdict::Flagged(format!("message contained blocked word \"{}\"", word)),
            None => Verdict::Clean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_checker() {
        let checker = KeywordChecker::new(["Scam", " ", "venmo"]);
        assert_eq!(checker.check("first class service"), Verdict::Clean);
        assert!(matches!(checker.check("send it to my VENMO now"), Verdict::Flagged(_)));
        assert!(matches!(checker.check("total scam!"), Verdict::Flagged(_)));
        assert_eq!(KeywordChecker::default().check("scam"), Verdict::Clean);
    }
}
