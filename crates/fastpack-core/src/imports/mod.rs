//! Import discovery for script modules.
//!
//! A lightweight scanner that finds `import`, `export ... from`, `require()`
//! and dynamic `import()` specifiers without a full parse.

mod scan;

pub use scan::{scan_imports, ScannedImport};
