pub mod dates;
pub mod env;
pub mod telemetry;
