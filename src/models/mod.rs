pub mod token;
pub mod vm;
