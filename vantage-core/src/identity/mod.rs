//! Family of four indexed caches (endpoints, pods, services, nodes) kept
//! eventually consistent with the control plane, plus the aggregate
//! resolver that composes them into endpoint identity lookups.

pub mod cache;
pub mod object;
pub mod resolver;
pub mod watch;

pub use cache::IdentityCache;
pub use object::{ControlObject, EndpointsObject, NodeObject, PodObject, ServiceObject};
pub use resolver::State;
pub use watch::{ApiServerWatcher, BoxStream, FakeWatcher, WatchEvent, Watcher};
