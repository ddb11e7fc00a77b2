pub mod permissions;
pub mod system;
pub mod tasks;
pub mod vm;
