use regex::Regex;
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

use crate::error::{ShimError, ShimResult};
use crate::models::Arguments;

/// T-SQL string literals (`''` escapes a quote), quoted identifiers,
/// placeholders and statement delimiters
const TOKEN_PATTERN: &str =
    r#"(?P<literal>'(?:[^']|'')*'|"[^"]*"|\[[^\]]*\])|(?P<placeholder>::?[A-Za-z_][A-Za-z0-9_]*)|(?P<delimiter>;)"#;

/// Lexical checks run on every statement before it is executed
pub struct StatementValidator {
    tokens: Regex,
}

impl StatementValidator {
    pub fn new() -> ShimResult<Self> {
        let tokens = Regex::new(TOKEN_PATTERN)
            .map_err(|e| ShimError::Config(format!("Invalid statement token pattern: {}", e)))?;
        Ok(Self { tokens })
    }

    /// Strip trailing delimiters and whitespace, then reject any `;` left
    /// outside a literal unless `allow_delimiter` is set
    pub fn ensure_single_statement<'a>(&self, sql: &'a str, allow_delimiter: bool) -> ShimResult<&'a str> {
        let trimmed = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if allow_delimiter {
            return Ok(trimmed);
        }

        let has_delimiter = self
            .tokens
            .captures_iter(trimmed)
            .any(|caps| caps.name("delimiter").is_some());
        if has_delimiter {
            return Err(ShimError::MultipleStatements);
        }
        Ok(trimmed)
    }

    /// Distinct `:name` placeholders outside literals, colon included
    pub fn placeholder_names(&self, sql: &str) -> BTreeSet<String> {
        self.tokens
            .captures_iter(sql)
            .filter_map(|caps| caps.name("placeholder"))
            .map(|m| m.as_str())
            // `::` is the T-SQL scope qualifier, not a placeholder
            .filter(|name| !name.starts_with("::"))
            .map(str::to_string)
            .collect()
    }

    /// Check that the placeholders in `sql` are exactly the bound arguments
    pub fn check_placeholders(&self, sql: &str, args: &Arguments) -> ShimResult<()> {
        let names = self.placeholder_names(sql);
        let matches = names.len() == args.len() && names.iter().all(|name| args.contains_key(name));
        if !matches {
            tracing::debug!("Placeholders {:?} do not match arguments {:?}", names, args.keys());
            return Err(ShimError::PlaceholderMismatch {
                expected: args.len(),
                found: names.len(),
            });
        }
        Ok(())
    }

    /// Parse `sql` as T-SQL and return the number of statements
    pub fn validate_tsql(sql: &str) -> ShimResult<usize> {
        let dialect = MsSqlDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| ShimError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        if statements.is_empty() {
            return Err(ShimError::InvalidSql("Empty SQL query".to_string()));
        }
        Ok(statements.len())
    }
}
