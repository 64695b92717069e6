//! Source adapters. Each one implements [`SourceMonitor`](crate::monitor::SourceMonitor)
//! and registers itself with a [`SourceMonitorFactory`](crate::factory::SourceMonitorFactory).

pub mod rss;

pub use rss::{register_rss, RssMonitor, RssOptions};
