pub mod directory;
pub mod evaluations;
