pub mod config;
pub mod detection;
pub mod display;
pub mod endpoints;
pub mod export;
pub mod meter;
pub mod model;
pub mod nn;
pub mod page;
pub mod session;
pub mod visualization;

#[cfg(test)]
pub(crate) mod fakes;
