pub mod core;
pub mod reports;
pub mod rollup;
pub mod settings;
