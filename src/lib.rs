pub mod mosaic;

pub use mosaic::color::ColorVector;
pub use mosaic::error::AppError;
pub use mosaic::image::Image;
pub use mosaic::owner::OwnerPrefix;
