pub mod types;
pub mod error;
pub mod request;
pub mod crypto;
pub mod jwt;
pub mod repository;
pub mod memory;
pub mod cache;
pub mod events;
pub mod mac;
pub mod resource;
pub mod response;
pub mod grant;
pub mod server;
pub mod config;
