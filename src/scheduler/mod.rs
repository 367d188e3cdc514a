pub mod command;
pub mod coordinator;
pub mod group;
pub mod health;
pub mod timer;

pub use command::{ConfigAck, ConfigCommand};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, StartupPolicy, TickAction, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_WRITE_QUEUE_CAPACITY,
};
pub use group::{GroupScheduler, GroupState};
pub use health::{
    ErrorTracker, FaultTransition, HealthSnapshot, TierInterval, DEFAULT_ERROR_THRESHOLD,
    MAX_ERROR_THRESHOLD, MIN_ERROR_THRESHOLD,
};
pub use timer::{Clock, MonotonicClock, Timer, Timestamp};
