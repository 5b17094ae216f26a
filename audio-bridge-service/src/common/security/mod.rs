pub mod certs;
pub mod endpoint_config;
