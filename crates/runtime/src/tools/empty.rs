//! Empty tool provider implementation.

use serde_json::{Map, Value};

use super::{ToolError, ToolProvider};
use crate::model::ToolSpec;

/// A provider with no tools.
///
/// The loop runs in plain conversational mode with it.
#[derive(Debug, Default)]
pub struct EmptyToolProvider;

impl ToolProvider for EmptyToolProvider {
    fn list_tools(&self) -> &[ToolSpec] {
        &[]
    }

    async fn invoke(&self, name: &str, _args: Map<String, Value>) -> Result<Value, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }
}
