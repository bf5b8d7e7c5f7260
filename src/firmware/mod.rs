//! Firmware package handling: container extraction into a disposable scratch
//! directory and role classification of the resulting images.

pub mod archive;
pub mod extractor;
pub mod roles;
pub mod scratch;

pub use extractor::{FirmwareExtractor, FirmwarePackage};
pub use scratch::ScratchDir;
