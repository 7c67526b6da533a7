pub mod rest;
pub mod series;

pub use rest::{create_router, ApiState};
