pub mod readings_routes;

pub use readings_routes::*;
