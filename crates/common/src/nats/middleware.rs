mod consume;
mod publish;
mod types;

pub use consume::*;
pub use publish::*;
pub use types::*;
