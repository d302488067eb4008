use crate::protocol::models::{JsonSchema as ParameterSchema, Tool};
use crate::{Error, Result};
use futures::FutureExt;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;

/// The declared half of a capability: what the remote model sees in the manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: ParameterSchema,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub output: Value,
}

/// Capability table: unique names mapped to async handlers.
///
/// Handlers take parsed JSON arguments and return JSON results, so every outcome
/// can cross the control channel as data.
#[derive(Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Register a typed tool; the parameter schema is derived from `TArgs`.
    ///
    /// # Errors
    /// Returns an error if the derived schema cannot be serialized.
    #[allow(clippy::result_large_err)]
    pub fn tool<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let parameters = parameters_for::<TArgs>()?;
        self.tool_with_schema(name, description, parameters, handler);
        Ok(())
    }

    /// Register a typed tool with an explicit parameter schema.
    pub fn tool_with_schema<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        parameters: ParameterSchema,
        handler: F,
    )
    where
        TArgs: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let entry = ToolDefinition {
            name: name.to_string(),
            description: Some(description.into()),
            parameters,
        };
        match self.defs.iter_mut().find(|def| def.name == name) {
            Some(existing) => {
                tracing::debug!(tool = name, "replacing registered tool");
                *existing = entry;
            }
            None => self.defs.push(entry),
        }

        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value)
                    .map_err(|e| Error::InvalidArguments(e.to_string()))?;
                let resp = user_handler(args).await?;
                serde_json::to_value(resp).map_err(|e| Error::HandlerFailure(e.to_string()))
            })
        };

        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Protocol-level tool list for `session.update`.
    #[must_use]
    pub fn manifest(&self) -> Vec<Tool> {
        self.defs
            .iter()
            .map(|def| Tool::Function {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            })
            .collect()
    }

    /// Run the handler registered for `call.name`.
    ///
    /// Panics inside a handler are caught and reported as `HandlerFailure`.
    ///
    /// # Errors
    /// `UnknownCapability` for unregistered names, `InvalidArguments` when the
    /// arguments do not fit the handler, otherwise whatever the handler returned.
    pub async fn dispatch(&self, call: ToolCall) -> Result<ToolResult> {
        let handler = self
            .handlers
            .get(&call.name)
            .cloned()
            .ok_or_else(|| Error::UnknownCapability(call.name.clone()))?;

        let output = AssertUnwindSafe(handler(call.arguments))
            .catch_unwind()
            .await
            .map_err(|panic| Error::HandlerFailure(panic_message(panic.as_ref())))??;

        Ok(ToolResult { call_id: call.call_id, output })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.defs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

/// JSON Schema for `T` with every sub-schema inlined, so enums show up in place.
///
/// # Errors
/// Returns an error if the generated schema cannot be serialized.
#[allow(clippy::result_large_err)]
pub fn parameters_for<T: JsonSchema>() -> Result<ParameterSchema> {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("title");
        object.remove("definitions");
    }
    Ok(value)
}

/// The structured failure payload sent back when a call cannot be served.
#[must_use]
pub fn failure_output(message: impl Into<String>) -> Value {
    serde_json::json!({ "success": false, "error": message.into() })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tool handler panicked".to_string())
}
