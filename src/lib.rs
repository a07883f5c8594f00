//! Download, install and catalog add-on and script packages.
//!
//! The entry point is [`install::ResourceManager`].

pub mod config;
pub mod install;
pub mod resource;
