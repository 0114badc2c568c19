//! Inspection of precompiled Qt resource containers: binary `.rcc` files or
//! libraries that carry them.

pub mod cli;
pub mod commands;
pub mod file_reader;
pub mod handlers;
pub mod loader;
pub mod namespace;
pub mod rcc;
