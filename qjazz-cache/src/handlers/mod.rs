pub mod file;

pub use file::FileProtocolHandler;
