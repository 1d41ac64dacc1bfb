//! The write path: sampler thread → bounded queue → dumper thread.

pub mod dumper;
pub mod queue;
pub mod sampler;
pub mod stats;
pub mod worker;

pub use dumper::{Dumper, SampleSink};
pub use queue::BoundedQueue;
pub use sampler::{Sampler, SamplerConfig};
pub use stats::{PollLatency, SamplerSnapshot, SamplerStats};
pub use worker::LifecycleError;
