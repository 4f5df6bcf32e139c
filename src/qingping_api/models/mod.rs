pub mod private_config;
pub mod request;
pub mod response;
