#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod resolver;
pub mod time;

pub use error::Error;
pub use resolver::resolve;
pub use time::Clock;
