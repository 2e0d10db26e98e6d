pub mod album;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod handlers;
pub mod menu;
pub mod model;
pub mod ops;
pub mod platform;
pub mod relay;
pub mod resolver;
pub mod scheduler;
pub mod telegram;
