//! Per-scan execution primitives: workspace materialization, sandboxed
//! analyzer invocation, error classification, and process-wide resource
//! bookkeeping. The Scan Executor in `scanforge_coordinator` composes
//! these into the full per-request pipeline.

pub mod cancel;
pub mod classify;
pub mod invoker;
pub mod janitor;
pub mod sandbox;
pub mod workspace;

pub use cancel::CancellationToken;
pub use classify::classify;
pub use janitor::ResourceJanitor;
pub use sandbox::{EnvMode, InProcessRuntime, InvocationRequest, SandboxError, SandboxRuntime, SandboxedRuntime};
pub use workspace::WorkspaceError;
