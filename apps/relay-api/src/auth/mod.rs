pub mod basic;
pub mod origin;
