//! Identity stage.

use crate::transform::{Stage, StageContext, StageError, StageInput, StageOutput};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ID: &str = "passthrough";

#[derive(Debug)]
pub struct Passthrough;

impl Stage for Passthrough {
    fn transform(
        &self,
        input: StageInput<'_>,
        _ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        Ok(StageOutput::content(input.content))
    }
}

pub fn create(_options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    Ok(Arc::new(Passthrough))
}
