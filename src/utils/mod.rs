pub mod scheduled_executor;

pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
