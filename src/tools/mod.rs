//! Vendor tool management: locating installed tools and their interpreters,
//! installing missing ones, and picking chipset loaders.

pub mod catalog;
pub mod install;
pub mod loaders;
pub mod resolver;

pub use catalog::ToolSpec;
pub use install::ToolInstaller;
pub use loaders::select_loader;
pub use resolver::ToolResolver;
