pub mod convert;
pub mod frame;

pub use convert::{scale_to, to_rgba};
pub use frame::{Frame, FrameError, PixelFormat};
