mod dispatcher;
mod ingestion_rule;
mod invocation;
mod normalizer;

pub use dispatcher::*;
pub use ingestion_rule::*;
pub use invocation::*;
pub use normalizer::*;
