use std::io::{IsTerminal, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use sqlsrv_compat::config::{Config, LoggingConfig};
use sqlsrv_compat::{InMemoryRewriteCache, QueryRewriter, QueryTranslator, ReservedWords, StatementValidator, StaticSchema};

const USAGE: &str = "usage: sqlsrv-compat [--validate] [SQL...]\n\
                     Rewrites portable SQL for SQL Server. Reads stdin when no SQL is given.";

fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(logging.use_ansi(std::io::stderr().is_terminal()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let mut validate = false;
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--validate" => validate = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => words.push(arg),
        }
    }

    // Load configuration; logging is set up from it
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    let schema = StaticSchema::from(&config.schema);
    let mut rewriter = QueryRewriter::new(&schema, &ReservedWords::sqlsrv())?;
    if config.cache.enabled {
        rewriter = rewriter.with_cache(
            Arc::new(InMemoryRewriteCache::new(config.cache.max_entries)),
            config.ttl_range(),
        );
    }
    info!(
        "Rewriting for {} with default schema {}",
        rewriter.dialect_name(),
        config.schema.default_schema
    );

    let sql = if words.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read SQL from stdin")?;
        input
    } else {
        words.join(" ")
    };

    let rewritten = rewriter.rewrite(sql.trim());
    println!("{}", rewritten);

    if validate {
        let count = StatementValidator::validate_tsql(&rewritten).context("Rewritten SQL is not valid T-SQL")?;
        info!("Rewritten SQL parsed as {} T-SQL statement(s)", count);
    }

    Ok(())
}
