// services/mod.rs
pub mod external;
pub mod fallback;

// Ré-exports pour faciliter l'import
pub use external::{PrimaryCompressionClient, ProfileCompressionClient};
pub use fallback::{AttemptRecord, FallbackChain};
