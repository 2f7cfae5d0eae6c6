mod context;
mod reconcile;
mod report;

pub use context::{ContextError, MirrorOptions, SyncContext};
pub use reconcile::{ReconcileStats, Reconciler};
pub use report::ChangeReporter;
