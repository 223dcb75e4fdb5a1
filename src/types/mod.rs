pub mod config;
pub mod fields;
pub mod notification;
pub mod request;
