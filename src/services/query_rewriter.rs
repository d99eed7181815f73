// SQL Server Query Rewriter
//
// Rewrites portable query text into SQL Server syntax right before a
// statement is prepared: reserved-word quoting, schema prefixes for portable
// functions, function renames and the concatenation operator.
//
// Known limitation: input with unbalanced quotes is rewritten on a
// best-effort basis and is not validated.

use rand::Rng;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::identifier::ReservedWords;
use super::rewrite_cache::RewriteCache;
use super::schema::SchemaInfo;
use crate::error::{ShimError, ShimResult};

/// Quoted literals, with backslash escapes honored. Matched first so their
/// content is always copied through untouched.
const LITERAL_PATTERN: &str = r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#;

/// Portable function names with a different native spelling
const FUNCTION_RENAMES: &[(&str, &str)] = &[("LENGTH", "LEN"), ("POW", "POWER")];

/// Translates portable query text to a target dialect
///
/// Kept behind a trait so the text-based rewriter can be swapped for a
/// parser-backed one without touching call sites.
pub trait QueryTranslator: Send + Sync {
    /// Get the name of the target dialect
    fn dialect_name(&self) -> &str;

    /// Rewrite `query` for the target dialect
    fn rewrite(&self, query: &str) -> String;
}

/// Regex-driven rewriter for SQL Server
pub struct QueryRewriter {
    schema_name: String,
    /// literal | reserved word | ordinary word | anything else
    reserved_pattern: Regex,
    /// literal | portable or renamed function call | `||`
    function_pattern: Regex,
    schema_functions: HashSet<String>,
    renames: HashMap<&'static str, &'static str>,
    cache: Option<Arc<dyn RewriteCache>>,
    ttl_range: (Duration, Duration),
}

impl QueryRewriter {
    pub fn new(schema: &dyn SchemaInfo, reserved: &ReservedWords) -> ShimResult<Self> {
        let mut words: Vec<&str> = reserved.iter().collect();
        // Longest first so a word never shadows a longer one sharing its prefix
        words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let words = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");

        let reserved_source = if words.is_empty() {
            format!(r#"(?i)(?P<literal>{})|(?P<word>[a-z]+)|(?P<other>[^a-z'"]+)"#, LITERAL_PATTERN)
        } else {
            format!(
                r#"(?i)(?P<literal>{})|\b(?P<reserved>{})\b|(?P<word>[a-z]+)|(?P<other>[^a-z'"]+)"#,
                LITERAL_PATTERN, words
            )
        };
        let reserved_pattern = Regex::new(&reserved_source)
            .map_err(|e| ShimError::Config(format!("Invalid reserved word pattern: {}", e)))?;

        let schema_functions: HashSet<String> = schema
            .portable_function_names()
            .iter()
            .map(|f| f.to_uppercase())
            .collect();

        let mut functions: Vec<&str> = schema_functions
            .iter()
            .map(String::as_str)
            .chain(FUNCTION_RENAMES.iter().map(|(from, _)| *from))
            .collect();
        functions.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        functions.dedup();
        let functions = functions.iter().map(|f| regex::escape(f)).collect::<Vec<_>>().join("|");

        let function_source = format!(
            r"(?i)(?P<literal>{})|\b(?P<function>{})\(|(?P<concat>\|\|)",
            LITERAL_PATTERN, functions
        );
        let function_pattern = Regex::new(&function_source)
            .map_err(|e| ShimError::Config(format!("Invalid function pattern: {}", e)))?;

        Ok(Self {
            schema_name: schema.default_schema_name().to_string(),
            reserved_pattern,
            function_pattern,
            schema_functions,
            renames: FUNCTION_RENAMES.iter().copied().collect(),
            cache: None,
            ttl_range: (Duration::from_secs(600), Duration::from_secs(3600)),
        })
    }

    /// Memoize rewrites in `cache`, each entry living a random duration
    /// within `ttl_range`
    pub fn with_cache(mut self, cache: Arc<dyn RewriteCache>, ttl_range: (Duration, Duration)) -> Self {
        self.cache = Some(cache);
        self.ttl_range = ttl_range;
        self
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Cache key for `query`; namespaced by schema because the cache may be
    /// shared by connections using different schemas
    fn cache_key(&self, query: &str) -> String {
        format!("query_cache_{}:{}", self.schema_name, query)
    }

    fn random_ttl(&self) -> Duration {
        let (min, max) = self.ttl_range;
        let (min, max) = (min.as_secs(), max.as_secs().max(min.as_secs()));
        Duration::from_secs(rand::rng().random_range(min..=max))
    }

    /// Rewrite without consulting the cache
    pub fn rewrite_uncached(&self, query: &str) -> String {
        let quoted = if is_select(query) {
            self.quote_reserved_words(query)
        } else {
            query.to_string()
        };
        self.replace_functions(&quoted)
    }

    /// Bracket reserved words that are used as identifiers
    fn quote_reserved_words(&self, query: &str) -> String {
        let mut rewritten = String::with_capacity(query.len() + 16);
        let mut last = 0;

        for caps in self.reserved_pattern.captures_iter(query) {
            let Some(word) = caps.name("reserved") else {
                continue;
            };
            let (start, end) = (word.start(), word.end());

            // Function-call-like usage, placeholder or already quoted
            let preceding = query[..start].chars().next_back();
            let following = query[end..].chars().next();
            if matches!(preceding, Some(':') | Some('[')) || following == Some('(') {
                continue;
            }

            rewritten.push_str(&query[last..start]);
            rewritten.push('[');
            rewritten.push_str(word.as_str());
            rewritten.push(']');
            last = end;
        }

        rewritten.push_str(&query[last..]);
        rewritten
    }

    /// Schema prefixes, function renames and `||` in one pass
    fn replace_functions(&self, query: &str) -> String {
        let mut rewritten = String::with_capacity(query.len() + 16);
        let mut last = 0;

        for caps in self.function_pattern.captures_iter(query) {
            let Some(whole) = caps.get(0) else {
                continue;
            };

            let replacement = if let Some(function) = caps.name("function") {
                let preceding = query[..whole.start()].chars().next_back();
                if matches!(preceding, Some(':') | Some('.')) {
                    continue;
                }
                let name = function.as_str();
                let upper = name.to_uppercase();
                if self.schema_functions.contains(&upper) {
                    format!("{}.{}(", self.schema_name, name)
                } else if let Some(native) = self.renames.get(upper.as_str()) {
                    format!("{}(", native)
                } else {
                    continue;
                }
            } else if caps.name("concat").is_some() {
                "+".to_string()
            } else {
                continue;
            };

            rewritten.push_str(&query[last..whole.start()]);
            rewritten.push_str(&replacement);
            last = whole.end();
        }

        rewritten.push_str(&query[last..]);
        rewritten
    }
}

impl QueryTranslator for QueryRewriter {
    fn dialect_name(&self) -> &str {
        "SQL Server"
    }

    fn rewrite(&self, query: &str) -> String {
        let Some(cache) = &self.cache else {
            return self.rewrite_uncached(query);
        };

        let key = self.cache_key(query);
        if let Some(cached) = cache.get(&key) {
            return cached;
        }

        let rewritten = self.rewrite_uncached(query);
        cache.set(&key, rewritten.clone(), self.random_ttl());
        rewritten
    }
}

fn is_select(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("SELECT"))
        .unwrap_or(false)
}
