// src/lib.rs
// Modules principaux
pub mod models;
pub mod core;
pub mod services;
pub mod utils;
pub mod workers;

// Ré-exports pour faciliter l'utilisation
pub use self::core::*;
pub use models::*;
pub use services::*;
pub use utils::*;
pub use workers::*;

// Version de la bibliothèque
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "File Processing Core";

// Types communs
pub use tokio_util::sync::CancellationToken;
