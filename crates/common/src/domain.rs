mod broadcast;
mod domain_event;
mod presence;
mod result;
mod time_series;

pub use broadcast::*;
pub use domain_event::*;
pub use presence::*;
pub use result::*;
pub use time_series::*;
