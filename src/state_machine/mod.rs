mod job;
mod state;

pub use job::{ErrorDescriptor, Job, JobMode, JobStatus, JobView};
pub use state::{StateMachine, Transition};
