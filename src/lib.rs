pub mod caption;
pub mod commands;
pub mod config;
pub mod engine;
pub mod hydrus;
pub mod ingest;
pub mod media;
pub mod model;
pub mod publish;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod telegram;
