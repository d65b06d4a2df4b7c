//! Client core: schema registry, record dispatch, frame counters and the
//! subscription manager that ties them to a connection.

pub mod dispatcher;
pub mod registry;
pub mod stats;
pub mod subscription;

pub use dispatcher::{Callback, ConsumerRegistration, DispatchReport, Dispatcher, TickerListener, TickerStream};
pub use registry::SchemaRegistry;
pub use stats::{FrameStats, FrameStatsSnapshot};
pub use subscription::TickerClient;
