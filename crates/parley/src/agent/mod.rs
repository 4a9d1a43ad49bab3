//! Conversation runtime: the [`Orchestrator`] loop and its supporting modules.
//!
//! - [`orchestrator::Orchestrator`]: validates input, checks threads out of
//!   the store, and runs model/tool rounds. Start here.
//! - [`config::OrchestratorConfig`]: round cap, deadline, tool dispatch and
//!   retry settings.
//! - [`events`]: [`EventHandler`] trait and [`OrchestratorEvent`] enum for
//!   observing a run, with [`LoggingHandler`], [`FnEventHandler`] and
//!   [`CompositeEventHandler`].
//! - [`store`]: [`ThreadStore`], sharded per-thread locking and idle eviction.
//! - [`thread`]: the [`Thread`] history type.
//! - [`prompt`]: default system instruction and [`SystemPromptBuilder`].

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod store;
pub mod thread;

// Re-export commonly used items at the module level.
pub use config::OrchestratorConfig;
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    OrchestratorEvent,
};
pub use orchestrator::Orchestrator;
pub use prompt::SystemPromptBuilder;
pub use store::{ThreadGuard, ThreadStore};
pub use thread::Thread;
