//! Static file stage.
//!
//! Names the module's bytes through the asset namer and replaces the module
//! with a script exporting the asset's public URL.

use super::js_string;
use crate::assets::DEFAULT_TEMPLATE;
use crate::transform::registry::parse_options;
use crate::transform::{OutputKind, Stage, StageContext, StageError, StageInput, StageOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ID: &str = "file";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOptions {
    /// Output name template, e.g. `fonts/[name].[ext]`.
    #[serde(default = "default_name")]
    name: String,
    /// Overrides the output public path for this rule.
    #[serde(default)]
    public_path: Option<String>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            name: default_name(),
            public_path: None,
        }
    }
}

fn default_name() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug)]
pub struct FileStage {
    name: String,
    public_path: Option<String>,
}

impl Stage for FileStage {
    fn transform(
        &self,
        _input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let record = ctx.emit_asset(&self.name, self.public_path.as_deref())?;
        ctx.set_output_kind(OutputKind::Asset);
        Ok(StageOutput::content(format!(
            "module.exports = {};",
            js_string(&record.public_url)
        )))
    }
}

pub fn create(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: FileOptions = parse_options(options)?;
    Ok(Arc::new(FileStage {
        name: options.name,
        public_path: options.public_path,
    }))
}
