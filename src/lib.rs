#![forbid(unsafe_code)]

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod link_check;
pub mod logging;
pub mod model;
pub mod registry;
pub mod session;
mod shared;
pub mod status;
pub mod upload;

pub use error::{ApiError, ErrorType};
pub use session::{CourseSession, DownloadedAsset, SessionSnapshot};
