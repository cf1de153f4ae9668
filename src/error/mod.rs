mod types;

pub use types::{LockError, Result};

// Re-export for convenience
pub use LockError as Error;
