pub mod condition; // Condition translation (REGEXP, LIKE, CONCAT_WS)
pub mod connection;
pub mod executor;
pub mod identifier;
pub mod query_rewriter;
pub mod rewrite_cache; // Rewrite memoization with LRU and TTL
pub mod schema;
pub mod transaction; // Savepoint stack and transaction scopes

pub use condition::{Condition, CompileContext, ConditionRewriter, PlaceholderCounter, PlaceholderSource, SqlsrvConditionRewriter};
pub use connection::*;
pub use executor::*;
pub use identifier::*;
pub use query_rewriter::*;
pub use rewrite_cache::*;
pub use schema::*;
pub use transaction::*;
