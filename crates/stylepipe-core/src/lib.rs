#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod css;
pub mod engine;
pub mod error;
pub mod imports;
pub mod pipeline;
pub mod plugin;
pub mod resolver;
pub mod version;

pub use adapter::StylePlugin;
pub use cache::{CachePolicy, MemoCache};
pub use config::{BuildMode, Config, PipelineConfig};
pub use css::{ClassMap, RenderCache, RenderOutput, StyleEngine};
pub use engine::{BuildEngine, BuildMessage, BuildReport};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use resolver::{PathResolver, ResolutionCache};
pub use version::VERSION;
