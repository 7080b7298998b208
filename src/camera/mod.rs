pub mod ffmpeg;
pub mod histogram;
pub mod metadata;
pub mod mjpeg;
pub mod session;
pub mod stream;
pub mod timelapse;
pub mod traits;
