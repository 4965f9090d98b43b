pub mod backup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod feedback;
pub mod filter;
pub mod tui;
pub mod watcher;

pub use backup::*;
pub use config::{AppConfig, Settings};
pub use coordinator::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use filter::*;
pub use watcher::*;
