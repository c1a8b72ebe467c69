#![forbid(unsafe_code)]

pub mod model;
pub mod navigation;
pub mod time;
pub mod timer;

pub use time::{Clock, ManualClock};
