pub mod adapter;
pub mod allocator;
pub mod broker;
pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod launcher;
pub mod lock;
pub mod producer;
pub mod registry;
pub mod shutdown;
