// Framework - cross-cutting policies the stores consult around every mutation

pub mod hooks;
pub mod privacy;

pub use hooks::{LifecycleEvent, LifecycleEvents, LifecycleKind, LifecycleListener, TracingListener};
pub use privacy::{CommentAction, GroupPermissions, PermissionOracle};
