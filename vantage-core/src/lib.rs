//! Shared engine behind both binaries: packet decoding and the flow ring
//! for the agent, identity caches and the graph engine for the collector.

pub mod collector;
pub mod decoder;
pub mod error;
pub mod graph;
pub mod identity;
pub mod ifindex;
pub mod kernel;
pub mod ring;

pub use collector::{process_trace, DropReason, TraceOutcome};
pub use decoder::decode;
pub use error::{CacheError, DecodeError, TracerError};
pub use graph::ServiceGraph;
pub use identity::{ApiServerWatcher, ControlObject, IdentityCache, State, Watcher};
pub use ifindex::IfindexMap;
pub use kernel::{FakeKernelRing, KernelRing, RawFrame};
pub use ring::{FlowRing, ReadResult, RingReader};
