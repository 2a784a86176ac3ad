pub mod config;
pub mod error;
pub mod fetch;
pub mod process;
pub mod publish;
pub mod report;
pub mod schema;
