pub mod point;
pub mod rect;

pub use point::PointF32;
pub use rect::RectF32;
