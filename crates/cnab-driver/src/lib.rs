//! Drivers turn a resolved [`Operation`] into a running invocation image.
//!
//! ```text
//! DriverRegistry ── lookup(image type) ──► Arc<dyn Driver>
//!                                             │ run(ctx, Operation)
//!                      ┌──────────────────────┴───────────────┐
//!                 DockerDriver                           DebugDriver
//!      (ContainerRuntime: DockerCli)              (prints the operation)
//! ```
//!
//! Cancellation flows through [`Context`]; a run that observes it returns
//! `CnabError::Cancelled` and writes nothing further to its sinks.

pub mod context;
pub mod debug;
pub mod docker;
pub mod driver;
pub mod operation;
pub mod registry;
pub mod sink;

pub use context::{CancelHandle, Context};
pub use debug::DebugDriver;
pub use docker::{DockerConfig, DockerDriver};
pub use driver::{Configurable, Driver};
pub use operation::{Operation, OperationConfig, OperationResult};
pub use registry::DriverRegistry;
pub use sink::{BufferSink, OutputSink, TeeSink};
