// SQL Server Connection
//
// Wraps a statement executor with everything the portable query layer
// expects from a connection: query preprocessing, range and temporary-table
// queries, identifier escaping and nested transactions.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use super::condition::CompileContext;
use super::executor::StatementExecutor;
use super::identifier::{IdentifierQuoter, ReservedWords};
use super::query_rewriter::{QueryRewriter, QueryTranslator};
use super::rewrite_cache::{InMemoryRewriteCache, RewriteCache};
use super::schema::{SchemaInfo, StaticSchema};
use super::transaction::{TransactionManager, TransactionScope};
use crate::config::Config;
use crate::error::{ShimError, ShimResult};
use crate::models::{Arguments, ExecuteOutcome, ImplicitEnd, QueryOptions, TransactionSettings};
use crate::validation::StatementValidator;

/// SQL comments outside string literals
const COMMENT_PATTERN: &str = r"(?s)(?P<literal>'(?:[^']|'')*')|(?P<comment>--[^\n]*|/\*.*?\*/)";

/// The select list of the leading SELECT, up to the first FROM
const SELECT_FROM_PATTERN: &str = r"(?is)^\s*SELECT(.*?)FROM";

pub struct Connection<E: StatementExecutor> {
    executor: E,
    schema: Arc<dyn SchemaInfo>,
    translator: Arc<dyn QueryTranslator>,
    quoter: IdentifierQuoter,
    validator: StatementValidator,
    transactions: TransactionManager,
    default_settings: TransactionSettings,
    /// Counter and per-connection key for temporary table names
    temporary_name_index: usize,
    temporary_key: String,
    escaped_tables: HashMap<String, String>,
    comment_pattern: Regex,
    select_from_pattern: Regex,
}

impl<E: StatementExecutor> Connection<E> {
    /// Create a connection from configuration, with a private rewrite cache
    /// when caching is enabled
    pub fn new(executor: E, config: &Config) -> ShimResult<Self> {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(InMemoryRewriteCache::new(config.cache.max_entries)) as Arc<dyn RewriteCache>);
        Self::with_cache(executor, config, cache)
    }

    /// Create a connection sharing `cache` with other connections
    pub fn with_cache(executor: E, config: &Config, cache: Option<Arc<dyn RewriteCache>>) -> ShimResult<Self> {
        let schema: Arc<dyn SchemaInfo> = Arc::new(StaticSchema::from(&config.schema));
        let reserved = ReservedWords::sqlsrv();

        let mut rewriter = QueryRewriter::new(schema.as_ref(), &reserved)?;
        if let Some(cache) = cache {
            rewriter = rewriter.with_cache(cache, config.ttl_range());
        }

        let settings = TransactionSettings {
            implicit_end: config.transactions.implicit_end,
        };

        Self::from_parts(
            executor,
            schema,
            Arc::new(rewriter),
            IdentifierQuoter::new(reserved),
            TransactionManager::new(config.transactions.enabled),
            settings,
        )
    }

    pub fn from_parts(
        executor: E,
        schema: Arc<dyn SchemaInfo>,
        translator: Arc<dyn QueryTranslator>,
        quoter: IdentifierQuoter,
        transactions: TransactionManager,
        default_settings: TransactionSettings,
    ) -> ShimResult<Self> {
        let comment_pattern = Regex::new(COMMENT_PATTERN)
            .map_err(|e| ShimError::Config(format!("Invalid comment pattern: {}", e)))?;
        let select_from_pattern = Regex::new(SELECT_FROM_PATTERN)
            .map_err(|e| ShimError::Config(format!("Invalid select pattern: {}", e)))?;

        Ok(Self {
            executor,
            schema,
            translator,
            quoter,
            validator: StatementValidator::new()?,
            transactions,
            default_settings,
            temporary_name_index: 0,
            temporary_key: uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
            escaped_tables: HashMap::new(),
            comment_pattern,
            select_from_pattern,
        })
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn schema(&self) -> &dyn SchemaInfo {
        self.schema.as_ref()
    }

    pub fn translator(&self) -> &dyn QueryTranslator {
        self.translator.as_ref()
    }

    pub fn quoter(&self) -> &IdentifierQuoter {
        &self.quoter
    }

    /// Trim, check and rewrite `sql` the way `query` does before executing
    pub fn prepare_query(&self, sql: &str, options: &QueryOptions) -> ShimResult<String> {
        let sql = self.validator.ensure_single_statement(sql, options.allow_delimiter)?;
        if options.bypass_preprocess {
            return Ok(sql.to_string());
        }
        Ok(self.translator.rewrite(sql))
    }

    /// Rewrite and execute one statement
    pub fn query(&mut self, sql: &str, args: &Arguments, options: &QueryOptions) -> ShimResult<ExecuteOutcome> {
        let prepared = self.prepare_query(sql, options)?;
        self.validator.check_placeholders(&prepared, args)?;

        tracing::debug!("Executing statement with {} argument(s)", args.len());
        self.executor.execute(&prepared, args, options.return_kind)
    }

    /// Execute SQL already written for SQL Server, without rewriting or
    /// placeholder checks
    pub fn query_direct(&mut self, sql: &str, args: &Arguments, options: &QueryOptions) -> ShimResult<ExecuteOutcome> {
        self.executor.execute(sql, args, options.return_kind)
    }

    /// Execute `sql` limited to `count` rows starting at row `from`
    pub fn query_range(
        &mut self,
        sql: &str,
        args: &Arguments,
        from: u64,
        count: u64,
        options: &QueryOptions,
    ) -> ShimResult<ExecuteOutcome> {
        let mut ranged = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string();
        // OFFSET/FETCH is only valid after an ORDER BY
        if !ranged.contains(" ORDER BY ") {
            ranged.push_str(" ORDER BY (SELECT NULL)");
        }
        ranged.push_str(&format!(" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", from, count));
        self.query(&ranged, args, options)
    }

    /// Store the result of a SELECT in a new temporary table and return its
    /// name
    ///
    /// Global temporary tables (`##name`) are visible to other sessions, so
    /// names carry a per-connection random key. With `real_table` a regular
    /// table is created instead.
    pub fn query_temporary(
        &mut self,
        sql: &str,
        args: &Arguments,
        real_table: bool,
        options: &QueryOptions,
    ) -> ShimResult<String> {
        let table = self.generate_temporary_table_name(real_table);

        let stripped = self.remove_comments(sql);
        if !self.select_from_pattern.is_match(&stripped) {
            return Err(ShimError::InvalidSql(
                "temporary table queries must start with SELECT ... FROM".to_string(),
            ));
        }
        let into = self
            .select_from_pattern
            .replace(&stripped, |caps: &regex::Captures<'_>| {
                format!("SELECT{} INTO {} FROM", &caps[1], table)
            })
            .into_owned();

        self.query(&into, args, options)?;
        tracing::debug!("Created temporary table {}", table);
        Ok(table)
    }

    fn generate_temporary_table_name(&mut self, real_table: bool) -> String {
        let name = format!("db_temp_{}_{}", self.temporary_name_index, self.temporary_key);
        self.temporary_name_index += 1;
        if real_table {
            name
        } else {
            format!("##{}", name)
        }
    }

    fn remove_comments(&self, sql: &str) -> String {
        self.comment_pattern
            .replace_all(sql, |caps: &regex::Captures<'_>| match caps.name("literal") {
                Some(literal) => literal.as_str().to_string(),
                None => String::new(),
            })
            .into_owned()
    }

    /// Strip characters that cannot appear in a field reference and quote
    /// reserved words
    pub fn escape_field(&self, field: &str) -> String {
        self.quoter.escape_field(field)
    }

    /// Strip characters that cannot appear in a table name, keeping a
    /// leading `#` or `##` temporary-table prefix
    pub fn escape_table(&mut self, table: &str) -> String {
        if let Some(escaped) = self.escaped_tables.get(table) {
            return escaped.clone();
        }

        let prefix = if table.starts_with("##") {
            "##"
        } else if table.starts_with('#') {
            "#"
        } else {
            ""
        };
        let cleaned: String = table
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        let escaped = format!("{}{}", prefix, cleaned);

        self.escaped_tables.insert(table.to_string(), escaped.clone());
        escaped
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn transaction_depth(&self) -> usize {
        self.transactions.depth()
    }

    pub fn in_transaction(&self) -> bool {
        self.transactions.depth() > 0
    }

    pub fn default_transaction_settings(&self) -> TransactionSettings {
        self.default_settings
    }

    /// Open a transaction scope with the connection's default settings
    ///
    /// The outermost scope is always named `sqlsrv_transaction`, so `name`
    /// only applies to nested scopes.
    pub fn begin_scope(&mut self, name: Option<&str>) -> ShimResult<TransactionScope<'_, E>> {
        let settings = self.default_settings;
        TransactionScope::begin(self, name, settings)
    }

    pub fn begin_scope_with(
        &mut self,
        name: Option<&str>,
        settings: TransactionSettings,
    ) -> ShimResult<TransactionScope<'_, E>> {
        TransactionScope::begin(self, name, settings)
    }

    /// Open a deferred-commit scope, committed when it goes out of scope
    pub fn begin_deferred_scope(&mut self, name: Option<&str>) -> ShimResult<TransactionScope<'_, E>> {
        self.begin_scope_with(
            name,
            TransactionSettings {
                implicit_end: ImplicitEnd::Commit,
            },
        )
    }

    pub fn push_transaction(&mut self, name: &str) -> ShimResult<()> {
        self.transactions.push(&mut self.executor, name)
    }

    pub fn release_transaction(&mut self, name: &str) -> ShimResult<()> {
        self.transactions.release(&mut self.executor, name)
    }

    /// Roll back to the savepoint `name`, discarding every layer above it
    pub fn rollback_to(&mut self, name: &str) -> ShimResult<()> {
        self.transactions.rollback(&mut self.executor, name)
    }

    pub fn add_root_end_callback<F>(&mut self, callback: F) -> ShimResult<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.transactions.add_root_end_callback(callback)
    }
}

impl<E: StatementExecutor> CompileContext for Connection<E> {
    fn default_schema_name(&self) -> &str {
        self.schema.default_schema_name()
    }

    fn escape_field(&self, field: &str) -> String {
        self.quoter.escape_field(field)
    }
}
