pub mod executor;
pub mod grouping;
pub mod state;
pub mod task;
pub mod task_based;
pub mod task_executor;

pub use executor::{DefaultGraphExecutor, GraphExecutor};
pub use grouping::{GroupByRepeatableBlocks, GroupingStrategy};
pub use state::{ExecutionState, ResultCache};
pub use task::{Task, TaskPurpose, TaskSpec, TaskStatus, TaskView};
pub use task_based::TaskBasedGraphExecutor;
pub use task_executor::{
    ExecutionManager, PooledTaskExecutor, SynchronousLocalTaskExecutor, TaskExecutor, TaskOutcome,
    TaskWork,
};
