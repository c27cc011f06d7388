pub mod tracker;

pub use tracker::{
    ArchivedSession, Invocation, SessionSummary, UsageTracker, DEFAULT_MAX_RECENT,
};
