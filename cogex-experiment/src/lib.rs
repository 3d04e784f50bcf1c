//! Building blocks, the tick scheduler that runs them and the session that
//! owns the clock, bus, devices and tracker bridge.

pub mod block;
pub mod config;
pub mod context;
pub mod paradigm;
pub mod predicate;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod trial;

pub use block::{Block, BlockId, LoopMode, Step};
pub use config::{ConfigError, ParadigmConfig, SessionConfig};
pub use context::{AbortHandle, ExecutionContext, PresentationCommand};
pub use predicate::{Condition, Expected, Predicate};
pub use scheduler::{Scheduler, SchedulerState};
pub use session::{Session, SessionBuilder, SessionError, run};
pub use sim::{RenderOp, SimRenderer};
pub use trial::{CompositionError, Trial};
