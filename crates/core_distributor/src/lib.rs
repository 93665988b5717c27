mod executor;
mod plan;
mod retry;
mod runner;

pub use executor::{ApprovalGate, RunControl, TaskExecutor, cancel_distribution, project_outcome};
pub use plan::{Distributor, DistributionError, select_agent};
pub use retry::RetryPolicy;
pub use runner::{GatewayRunner, TaskRunError, TaskRunner};
