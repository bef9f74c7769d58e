//! Import discovery for script and stylesheet sources.
//!
//! Provides a lightweight scanner that finds import specifiers without a
//! full parse. Positions are byte ranges into the original source so the
//! emitter can rewrite or drop them.

mod scan;

pub use scan::{scan_css, scan_js, ImportKind, ImportRecord};
