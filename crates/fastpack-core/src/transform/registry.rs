//! Stage registry.
//!
//! Maps stage ids used in rule configs to factories. Consulted only while the
//! configuration is compiled; a build pass works with [`ConfiguredStage`]s.

use super::{stages, Stage};
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds stages from their options.
pub trait StageFactory: Send + Sync {
    fn id(&self) -> &str;

    /// `options` are the rule's per-stage options (`Value::Null` when none
    /// were given). `shared` is the config's shared option bag.
    fn create(&self, options: &Value, shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String>;
}

type CreateFn = fn(&Value, &Map<String, Value>) -> Result<Arc<dyn Stage>, String>;

struct FnFactory {
    id: &'static str,
    create: CreateFn,
}

impl StageFactory for FnFactory {
    fn id(&self) -> &str {
        self.id
    }

    fn create(&self, options: &Value, shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
        (self.create)(options, shared)
    }
}

/// A stage instance bound to one rule.
#[derive(Clone)]
pub struct ConfiguredStage {
    pub id: String,
    pub stage: Arc<dyn Stage>,
}

impl fmt::Debug for ConfiguredStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredStage").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Known stage factories by id.
#[derive(Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, Arc<dyn StageFactory>>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry").field("ids", &self.ids()).finish()
    }
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in stage.
    #[must_use]
    pub fn with_builtins() -> Self {
        let builtins: [(&'static str, CreateFn); 9] = [
            (stages::passthrough::ID, stages::passthrough::create),
            (stages::script::ID, stages::script::create),
            (stages::css::ID, stages::css::create),
            (stages::sass::ID, stages::sass::create),
            (stages::style::INJECT_ID, stages::style::create_inject),
            (stages::style::EXTRACT_ID, stages::style::create_extract),
            (stages::file::ID, stages::file::create),
            (stages::command::ID, stages::command::create),
            (stages::json::ID, stages::json::create),
        ];
        let mut registry = Self::new();
        for (id, create) in builtins {
            registry.register(Arc::new(FnFactory { id, create }));
        }
        registry
    }

    /// Add a factory, replacing any factory with the same id.
    pub fn register(&mut self, factory: Arc<dyn StageFactory>) {
        self.factories.insert(factory.id().to_string(), factory);
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the stage `id` for rule number `rule`.
    pub fn instantiate(
        &self,
        rule: usize,
        id: &str,
        options: &Value,
        shared: &Map<String, Value>,
    ) -> Result<ConfiguredStage, ConfigError> {
        let factory = self.factories.get(id).ok_or_else(|| ConfigError::UnknownStage {
            rule,
            stage: id.to_string(),
            known: self.ids().join(", "),
        })?;
        let stage = factory
            .create(options, shared)
            .map_err(|message| ConfigError::InvalidStageOptions {
                rule,
                stage: id.to_string(),
                message,
            })?;
        Ok(ConfiguredStage {
            id: id.to_string(),
            stage,
        })
    }
}

/// Deserialize stage options, treating a missing options object as defaults.
pub(crate) fn parse_options<T>(options: &Value) -> Result<T, String>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| e.to_string())
}
