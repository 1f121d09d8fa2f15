pub mod reader;
pub mod schema;
pub mod settings;
