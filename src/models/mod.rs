pub mod anchor;
pub mod file_record;

pub use anchor::*;
pub use file_record::*;
