pub mod config;
pub mod controller;
pub mod error;
pub mod k8s;
pub mod notify;
