pub mod elements;
pub mod files;
