pub mod build;
pub mod render;
pub mod resolve;
pub mod serve;
pub mod version;
pub mod watch;
