pub mod error;
pub mod models;
pub mod standing;
pub mod classifier;
pub mod picks;
pub mod replay;
pub mod game;
pub mod aggregator;
pub mod sink;
pub mod verify;
pub mod pool;
pub mod config;
