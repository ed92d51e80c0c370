//! Byte movement: copier, throttle and commit-on-close write streams

pub mod buffered;
pub mod copier;
pub mod throttle;

pub use buffered::{BufferedWriteStream, ClosingWriteStream, Commit, splice};
pub use copier::{DEFAULT_CHUNK_SIZE, DisabledStreamListener, StreamCopier, StreamListener};
pub use throttle::BandwidthThrottle;
