#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde;

pub mod api;
pub mod error;
pub mod lifecycle;
pub mod location;
pub mod logger;
pub mod monitor;
pub mod orch;
pub mod pagination;
pub mod rest;
pub mod service;
pub mod spdk;
pub mod store;
