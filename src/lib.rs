pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod remote;
pub mod sync;
