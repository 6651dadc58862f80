pub mod args;
pub mod describe;
