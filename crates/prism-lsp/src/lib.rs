pub mod server;
pub mod settings;

// Re-export commonly used types
pub use server::{Backend, HostConfig};
pub use settings::ServerSettings;
