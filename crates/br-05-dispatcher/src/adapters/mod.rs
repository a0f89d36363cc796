//! Adapters for the dispatcher ports

pub mod journal;
pub mod loopback;
pub mod observer;
