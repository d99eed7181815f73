use crate::config::SchemaConfig;

/// Schema information the translator needs from the schema layer
pub trait SchemaInfo: Send + Sync {
    /// Schema used to qualify portable functions and REGEXP calls
    fn default_schema_name(&self) -> &str;

    /// Portable functions installed as user-defined functions in that schema
    fn portable_function_names(&self) -> &[String];
}

/// Schema information fixed at construction time
#[derive(Debug, Clone)]
pub struct StaticSchema {
    default_schema: String,
    portable_functions: Vec<String>,
}

impl StaticSchema {
    pub fn new(default_schema: impl Into<String>, portable_functions: Vec<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            portable_functions,
        }
    }
}

impl From<&SchemaConfig> for StaticSchema {
    fn from(config: &SchemaConfig) -> Self {
        Self::new(config.default_schema.clone(), config.portable_functions.clone())
    }
}

impl SchemaInfo for StaticSchema {
    fn default_schema_name(&self) -> &str {
        &self.default_schema
    }

    fn portable_function_names(&self) -> &[String] {
        &self.portable_functions
    }
}
