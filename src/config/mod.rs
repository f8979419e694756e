//! Runtime configuration

mod schema;

pub use schema::{Config, ScreenSize};
