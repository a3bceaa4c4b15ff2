pub mod client;
pub mod templates;
