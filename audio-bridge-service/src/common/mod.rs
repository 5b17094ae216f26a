pub mod app_config;
pub mod logging;
pub mod security;
pub mod services;
