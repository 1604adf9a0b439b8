//! Shoal host integration for Linux: config loading, tracing setup, a
//! file-backed resume store and a file-backed block source.

pub mod block_file;
pub mod config;
pub mod file_store;
pub mod logging;

pub use block_file::FileBlockSource;
pub use config::Config;
pub use file_store::FileStore;

/// Open the resume store configured in `config.resume_dir`.
pub fn open_store(config: &Config) -> std::io::Result<FileStore> {
    FileStore::open(&config.resume_dir)
}
