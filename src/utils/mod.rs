pub mod encryption;
pub mod sanitize;
