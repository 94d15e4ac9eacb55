//! Tool provider trait and call validation.

use std::future::Future;

use serde_json::{Map, Value};

use super::ToolError;
use crate::model::{ToolCall, ToolSpec};

/// Trait for tool execution collaborators.
///
/// Implementations advertise tool specifications and execute calls. This is
/// the boundary between the model loop and side effects; the loop never
/// talks to a transport directly.
pub trait ToolProvider: Send + Sync {
    /// Tools available for this session. Fixed once the provider is built.
    fn list_tools(&self) -> &[ToolSpec];

    /// Execute a tool with already-validated arguments.
    fn invoke(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;

    /// Whether several calls may be in flight at once.
    fn supports_parallel(&self) -> bool {
        false
    }
}

/// Check a call against the advertised specs.
///
/// Returns the argument object on success. A `null` input is treated as an
/// empty object.
pub fn validate_call(specs: &[ToolSpec], call: &ToolCall) -> Result<Map<String, Value>, ToolError> {
    let spec = specs
        .iter()
        .find(|spec| spec.name == call.name)
        .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

    let args = match &call.input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidInput(format!(
                "arguments for `{}` must be an object, got {other}",
                call.name
            )));
        }
    };

    if let Some(param) = spec
        .required_params()
        .into_iter()
        .find(|param| !args.contains_key(*param))
    {
        return Err(ToolError::MissingArgument {
            tool: call.name.clone(),
            param: param.to_string(),
        });
    }

    if let Some(param) = args.keys().find(|param| !spec.accepts_param(param)) {
        return Err(ToolError::UnexpectedArgument {
            tool: call.name.clone(),
            param: param.clone(),
        });
    }

    Ok(args)
}
