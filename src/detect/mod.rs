mod backend;
pub mod backends;
mod center;
mod decode;
mod result;
mod suppress;

pub use backend::InferenceBackend;
pub use center::{frame_center, select_center_target};
pub use decode::{decode, decode_channels, ClassWindow, DecoderConfig};
pub use result::{BoundingBox, Detection, DetectionKey, DetectionSet, Projection};
pub use suppress::{suppress, CONTAINMENT_RATIO};
