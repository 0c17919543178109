pub mod element;
pub mod version;

pub use element::{Element, ElementId, TEXT_TAG, binding, binding_name};
pub use version::VersionTracker;
