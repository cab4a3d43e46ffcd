pub mod filesystem;

pub use filesystem::ScratchDir;
