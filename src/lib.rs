pub mod config;
pub mod db;
pub mod enums;
pub mod error;
pub mod markdown;
pub mod mcp;
pub mod models;
pub mod notify;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;
pub mod views;
