// Identifier quoting for SQL Server reserved keywords
//
// The generic query layer emits bare identifiers. A handful of them are
// keywords in T-SQL and must be bracket-quoted.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// SQL Server keywords that are valid identifiers in the portable dialect.
///
/// `escape` is left out on purpose: quoting it breaks `LIKE x ESCAPE y`.
pub const SQLSRV_RESERVED_WORDS: &[&str] = &[
    "action", "admin", "alias", "any", "are", "array", "at", "begin", "boolean", "class",
    "commit", "contains", "current", "data", "date", "day", "depth", "domain", "external",
    "file", "full", "function", "get", "go", "host", "input", "language", "last", "less",
    "local", "map", "min", "module", "new", "no", "object", "old", "open", "operation",
    "parameter", "parameters", "path", "plan", "prefix", "proc", "public", "ref", "result",
    "returns", "role", "row", "rule", "save", "search", "second", "section", "session",
    "size", "state", "statistics", "temporary", "than", "time", "timestamp", "tran",
    "translate", "translation", "trim", "user", "value", "variable", "view", "without",
];

/// Immutable, case-insensitive reserved-word set
#[derive(Debug, Clone)]
pub struct ReservedWords {
    words: HashSet<String>,
}

impl ReservedWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// The default SQL Server list, built once and shared
    pub fn sqlsrv() -> Arc<Self> {
        static SHARED: OnceLock<Arc<ReservedWords>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(ReservedWords::new(SQLSRV_RESERVED_WORDS)))
            .clone()
    }

    pub fn contains(&self, word: &str) -> bool {
        if word.bytes().any(|b| b.is_ascii_uppercase()) {
            self.words.contains(&word.to_ascii_lowercase())
        } else {
            self.words.contains(word)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Bracket-quotes identifiers that collide with reserved words
#[derive(Debug, Clone)]
pub struct IdentifierQuoter {
    reserved: Arc<ReservedWords>,
}

impl IdentifierQuoter {
    pub fn new(reserved: Arc<ReservedWords>) -> Self {
        Self { reserved }
    }

    pub fn reserved_words(&self) -> &Arc<ReservedWords> {
        &self.reserved
    }

    /// Quote the trailing segment of `identifier` if it is reserved.
    ///
    /// `table.user` becomes `table.[user]`; the qualifier is never touched.
    pub fn quote(&self, identifier: &str) -> String {
        let (qualifier, name) = match identifier.rsplit_once('.') {
            Some((qualifier, name)) => (Some(qualifier), name),
            None => (None, identifier),
        };

        if !self.reserved.contains(name) {
            return identifier.to_string();
        }

        match qualifier {
            Some(qualifier) => format!("{}.[{}]", qualifier, name),
            None => format!("[{}]", name),
        }
    }

    /// Strip characters that cannot appear in a field reference, then quote.
    pub fn escape_field(&self, field: &str) -> String {
        let cleaned: String = field
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        self.quote(&cleaned)
    }
}

impl Default for IdentifierQuoter {
    fn default() -> Self {
        Self::new(ReservedWords::sqlsrv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_every_reserved_word() {
        let quoter = IdentifierQuoter::default();
        for word in SQLSRV_RESERVED_WORDS {
            assert_eq!(quoter.quote(word), format!("[{}]", word));
            assert_eq!(quoter.quote(&format!("t.{}", word)), format!("t.[{}]", word));
        }
    }

    #[test]
    fn test_case_insensitive_match_keeps_spelling() {
        let quoter = IdentifierQuoter::default();
        assert_eq!(quoter.quote("User"), "[User]");
        assert_eq!(quoter.quote("users.TIMESTAMP"), "users.[TIMESTAMP]");
    }

    #[test]
    fn test_non_reserved_unchanged() {
        let quoter = IdentifierQuoter::default();
        assert_eq!(quoter.quote("title"), "title");
        assert_eq!(quoter.quote("users.name"), "users.name");
        assert_eq!(quoter.quote("username"), "username");
        // Only the trailing segment is checked
        assert_eq!(quoter.quote("user.name"), "user.name");
    }

    #[test]
    fn test_multi_part_identifier_quotes_trailing_segment() {
        let quoter = IdentifierQuoter::default();
        assert_eq!(quoter.quote("db.dbo.t.value"), "db.dbo.t.[value]");
    }

    #[test]
    fn test_escape_field_strips_invalid_characters() {
        let quoter = IdentifierQuoter::default();
        assert_eq!(quoter.escape_field("n.user"), "n.[user]");
        assert_eq!(quoter.escape_field("title; DROP"), "titleDROP");
        assert_eq!(quoter.escape_field("[path]"), "[path]");
    }

    #[test]
    fn test_shared_reserved_set() {
        let a = ReservedWords::sqlsrv();
        let b = ReservedWords::sqlsrv();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), SQLSRV_RESERVED_WORDS.len());
        assert!(!a.contains("escape"));
    }

    #[test]
    fn test_custom_reserved_words() {
        let quoter = IdentifierQuoter::new(Arc::new(ReservedWords::new(["Status"])));
        assert_eq!(quoter.quote("status"), "[status]");
        assert_eq!(quoter.quote("user"), "user");
    }
}
