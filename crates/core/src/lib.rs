pub mod collection;
pub mod entity;
pub mod error;
pub mod field_value;
pub mod ids;

pub use collection::CollectionView;
pub use entity::Entity;
pub use error::CoreError;
pub use field_value::{FieldValue, Fields};
pub use ids::*;
