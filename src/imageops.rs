mod convert;
pub mod peaks;

pub use convert::{from_luma_image, mean_plane, normalize, to_luma_image};
