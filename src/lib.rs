//! Migrates the metadata Picasa kept next to photos (stars, albums, face
//! tags) into a digiKam database.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod identity;
pub mod logging;
pub mod mapping;
pub mod migrate;
pub mod picasa;
pub mod scanner;
pub mod writer;

pub use error::{MigrateError, Result};
