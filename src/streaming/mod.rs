//! Active upload streaming / 流式上传
//!
//! While a chunked upload is in flight its bytes live in an in-memory
//! [`ActiveUpload`] buffer, so downloads of the same path can read them
//! before the backend write completes.

pub mod coordinator;
pub mod registry;

pub use coordinator::{ReceiveError, StreamingCoordinator};
pub use registry::{ActiveUpload, Registry, Snapshot};
