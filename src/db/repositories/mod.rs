pub mod feedback;
pub mod usage;
