pub mod catalog;
pub mod config;
pub mod contract;
pub mod error;
pub mod interactive;
pub mod output;
pub mod scoring;
pub mod staged;
