pub mod compose;
pub mod mosaic;
pub mod render;
pub mod store;
pub mod zone;
