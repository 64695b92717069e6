// Library interface for topicscope modules
// Monitors, scorers and storage are used by the sweep and by integration tests.

pub mod error;
pub mod factory;
pub mod model;
pub mod monitor;
pub mod prioritizer;
pub mod relevance;
pub mod sources;
pub mod storage;
pub mod sweep;

pub use error::{ConfigurationError, MonitorError};
pub use factory::SourceMonitorFactory;
pub use model::{
    ContentItem, ItemExtras, MonitoringResult, PriorityLevel, RawRecord, SourceMetadata,
    SourceType,
};
pub use monitor::{Monitor, MonitorSettings, SourceMonitor};
pub use prioritizer::{ContentPrioritizer, PriorityResult, Strategy};
pub use relevance::{RelevanceFilter, RelevanceVerdict};
pub use storage::StorageManager;
pub use sweep::{run_sweep, SweepOptions, SweepReport};
