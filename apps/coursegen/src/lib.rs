pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use client::{ClientError, CourseClient};
