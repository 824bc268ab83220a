pub mod parser;
pub mod phone;
pub mod template;
pub mod types;
