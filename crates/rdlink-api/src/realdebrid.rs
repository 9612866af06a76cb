pub mod client;
pub mod error;
pub mod types;

pub use client::{RealDebridClient, DEFAULT_BASE_URL};
pub use error::DebridError;
