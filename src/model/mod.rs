//! # Property Graph Model
//!
//! Clean DTOs describing what comes back from the server. These types cross
//! every boundary: driver seam, normalizer, caller.
//!
//! Design rule: NO driver types, NO wire types here. This module is pure
//! data, no I/O, no state, no async.

pub mod node;
pub mod path;
pub mod property_map;
pub mod relationship;
pub mod value;

pub use node::{Node, NodeId};
pub use path::Path;
pub use property_map::PropertyMap;
pub use relationship::{RelId, Relationship};
pub use value::{IsoDuration, Value};
