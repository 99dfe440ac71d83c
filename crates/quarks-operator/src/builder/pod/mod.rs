pub mod container;
pub mod security;
pub mod volume;
