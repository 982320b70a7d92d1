#![allow(dead_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod binning;
pub mod binomial;
pub mod blank;
pub mod config;
pub mod dilution;
mod error;
pub mod fit;
pub mod io;
pub mod reconcile;
pub mod spectrum;
pub mod units;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
