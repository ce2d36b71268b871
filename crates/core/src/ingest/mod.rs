pub mod pipeline;
pub mod provider;
pub mod types;
