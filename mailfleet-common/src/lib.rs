//! Shared plumbing for the mailfleet workspace: logging setup and the
//! cancellation token observed by every suspending component.

pub mod cancel;
pub mod logging;

pub use cancel::CancelToken;
pub use tracing;
