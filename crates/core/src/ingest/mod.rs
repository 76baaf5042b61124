pub mod provider;
pub mod quality;
pub mod types;
pub mod yahoo;
