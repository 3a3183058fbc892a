pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod remote;
pub mod repository;
pub mod services;
pub mod session;
