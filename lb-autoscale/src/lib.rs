pub mod config;
pub mod controller;
pub mod error;
pub mod kubernetes;
pub mod monitoring;

#[cfg(test)]
pub(crate) mod testing;
