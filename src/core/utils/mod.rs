//! 实用工具

pub mod directory;
pub mod image;
pub mod symlink;
