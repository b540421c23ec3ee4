pub mod provider;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod types;
