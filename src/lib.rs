pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod model;
pub mod session;
pub mod signal;
pub mod source;
pub mod tasks {
    pub mod feed;
}
