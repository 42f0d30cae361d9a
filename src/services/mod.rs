pub mod background;
pub mod driver;
pub mod notifications;
pub mod preferences;
pub mod typeql_analyzer;

pub use notifications::*;
pub use preferences::*;
pub use typeql_analyzer::*;
