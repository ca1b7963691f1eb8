//! # Lattice Core Properties
//!
//! Case-insensitive key/value dictionaries used for service properties,
//! bundle headers and framework launch properties.
//!
//! Values are plain [`serde_json::Value`]s. Keys keep their original
//! spelling and insertion order, while lookups ignore ASCII case unless the
//! caller asks otherwise. A [`SharedProperties`] wraps a dictionary in its
//! own lock and hands out [`PropertiesHandle`] read guards that keep the
//! lock until they are dropped.

pub mod error;
pub mod store;

pub use error::PropertyError;
pub use store::{Properties, PropertiesHandle, SharedProperties};

/// The value type stored in every property dictionary.
pub type PropertyValue = serde_json::Value;
