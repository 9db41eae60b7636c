//! JSON modules.

use super::{collapsed_map, js_string};
use crate::transform::registry::parse_options;
use crate::transform::{Stage, StageContext, StageError, StageInput, StageOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ID: &str = "json";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonOptions {}

#[derive(Debug)]
pub struct JsonStage;

impl Stage for JsonStage {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let value: Value = serde_json::from_str(&input.content)
            .map_err(|e| StageError::failed(format!("invalid JSON: {e}")))?;
        let literal = match &value {
            Value::String(s) => js_string(s),
            other => other.to_string(),
        };
        let content = format!("module.exports = {literal};\n");
        let map = collapsed_map(ctx.source_name(), &content);
        Ok(StageOutput {
            content,
            map: Some(map),
        })
    }
}

pub fn create(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let _: JsonOptions = parse_options(options)?;
    Ok(Arc::new(JsonStage))
}
