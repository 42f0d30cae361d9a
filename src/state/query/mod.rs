mod registry;
mod response;
mod runner;

pub use registry::QueryRunnerRegistry;
pub use response::{MessageKind, Response, ResponseStream, Stream, StreamItem, StreamSource};
pub use runner::QueryRunner;
