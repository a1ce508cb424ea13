use crate::prometheus::registry::RegistryError;
use crate::prometheus::text_create::is_valid_metric_name;

/// Immutable metadata of a metric: its fully-qualified name and help text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desc {
    fq_name: String,
    help: String,
}

impl Desc {
    pub fn new(fq_name: &str, help: &str) -> Result<Self, RegistryError> {
        if !is_valid_metric_name(fq_name) {
            return Err(RegistryError::InvalidName(fq_name.to_string()));
        }
        Ok(Desc {
            fq_name: fq_name.to_string(),
            help: help.to_string(),
        })
    }

    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    pub fn help(&self) -> &str {
        &self.help
    }
}
