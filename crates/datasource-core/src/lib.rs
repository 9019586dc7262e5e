//! # datasource-core
//!
//! The collaborator interfaces of the pooled data source.
//!
//! A [`ConnectionFactory`] opens physical [`Connection`]s from a URL and a
//! pair of credentials. Drivers implement both traits; the pool consumes
//! them and hands out handles that implement [`Connection`] themselves.
//!
//! ## Example
//!
//! ```rust,ignore
//! use datasource_core::{Connection, ConnectionFactory, DriverError};
//!
//! struct MyDriver;
//!
//! impl ConnectionFactory for MyDriver {
//!     fn open(&self, url: &str, user: &str, pass: &str)
//!         -> Result<Box<dyn Connection>, DriverError>
//!     {
//!         Ok(Box::new(my_driver::connect(url, user, pass)?))
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;

pub use connection::{Connection, ConnectionFactory};
pub use error::DriverError;
