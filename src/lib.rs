pub mod config;
pub mod error;
pub mod health;
pub mod input;
pub mod model;
pub mod scheduler;
pub mod source;
pub mod surface;
pub mod sync;
pub mod ui;
