pub mod adapter;
pub mod adapter_set;
pub mod default_adapters;
pub mod points;

pub use adapter::{AsyncLifecycleAdapter, LifecycleAdapter};
pub use adapter_set::{LifecycleAdapterSet, ValidationOutcome};
pub use default_adapters::{GracefulErrorAdapter, TracingHook};
pub use points::{LifecyclePoint, PointKind};
