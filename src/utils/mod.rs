pub mod coordinates;
pub mod geometry;
pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use geometry::{crop_quad, dilate, rasterize_mask, rescale_boxes, rescale_points, StructuringElement};
pub use image_ops::{load_image_from_memory_async, resize_aspect_ratio, ResizeTransform};
pub use metrics::Metrics;
