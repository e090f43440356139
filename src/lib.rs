#![doc = include_str!("../README.md")]

pub mod addr;
pub mod client;
mod error;
pub mod pool;
pub mod port;
pub mod queue;
mod socket;

pub use error::{Error, Result};
pub use socket::Socket;
