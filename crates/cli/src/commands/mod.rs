pub mod ask;
pub mod doctor;
pub mod gpu;
pub mod init;
pub mod models;
pub mod runtime;
pub mod usage;
