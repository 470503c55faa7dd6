pub mod color;
pub mod file_info;
pub mod file_size;
