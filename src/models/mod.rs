pub mod condition_node;
pub mod query;
pub mod transaction_layer;
pub mod value;

pub use condition_node::*;
pub use query::*;
pub use transaction_layer::*;
pub use value::*;
