pub mod driver;
pub mod interpreter;
pub mod rollback;
pub mod runner;
pub mod scripted;
pub mod validator;

// Re-exports for convenience (used in main.rs and the ui module)
pub use driver::{ExecutionDriver, ExecutionRecord, RunHandle, RunReport, RunStatus};
pub use interpreter::{ResultInterpreter, StepOutcome};
pub use rollback::{RollbackCoordinator, RollbackMapping, RollbackOutcome};
pub use runner::{build_sandbox, Sandbox, SandboxError, SandboxResult};
pub use validator::{PolicyGate, PolicyViolation, Verdict};
