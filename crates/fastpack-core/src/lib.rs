#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! fastpack engine: rule matching, transform stages, the module graph,
//! bundle emission and the watch-mode coordinator.

pub mod assets;
pub mod build;
pub mod config;
pub mod dev;
pub mod emit;
pub mod error;
pub mod graph;
pub mod imports;
pub mod rules;
pub mod sourcemap;
pub mod transform;
pub mod version;

pub use assets::{AssetNamer, AssetRecord};
pub use build::{BuildOutput, CancelSource, CancelToken, Compiler};
pub use config::Config;
pub use dev::{BuildSnapshot, DevCoordinator, DevHandle, DevOptions, DevState, DevStatus};
pub use emit::{Artifact, BundleSummary};
pub use error::{BuildReport, ConfigError, Diagnostic, Error};
pub use rules::{MatchPolicy, RuleSet};
pub use transform::StageRegistry;
pub use version::VERSION;
