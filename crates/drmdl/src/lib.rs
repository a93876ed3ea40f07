pub mod acquire;
pub mod capture;
pub mod cdm;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod fetch;
pub mod license;
pub mod manifest;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod subtitle;
pub mod tools;
pub mod unit;
pub mod util;

pub use config::Config;
pub use error::{DrmdlError, DrmdlResult, ErrorKind};
pub use model::*;
pub use unit::{UnitRunner, UnitState};
pub use util::http::HttpClient;
