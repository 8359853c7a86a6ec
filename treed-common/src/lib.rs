//! # Tree-D Common Library
//!
//! Shared code for the Tree-D museum guide services:
//! - Artifact/language catalog and audio durations
//! - Database initialization, models and settings
//! - Administrator request signing and verification
//! - Configuration loading and root folder resolution
//! - Wall-clock source

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use catalog::{Catalog, CatalogError, LanguageCode, SlotId};
pub use error::{Error, Result};
