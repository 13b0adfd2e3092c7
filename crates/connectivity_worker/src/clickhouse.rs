mod time_series_sink;

pub use time_series_sink::*;
