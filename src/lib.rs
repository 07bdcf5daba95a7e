pub mod config;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod server;

// Re-export commonly used types for easier access
pub use config::{Config, load_config};
pub use errors::{StudioError, StudioResult};
pub use generation::GenerationClient;
pub use providers::{FailoverDispatcher, ProviderConfig, ProviderRegistry};
pub use server::{AppState, create_app, start_server};
