pub mod engine;
pub mod error;
pub mod filters;
pub mod levels;
pub mod watch;

pub use engine::TraceFilter;
pub use error::TraceError;
pub use levels::{LevelError, MAX_LEVELS};
pub use watch::{ConditionFn, Control, ValueReader};
