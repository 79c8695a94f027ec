pub mod agent;
pub mod binding;
pub mod coordinator;
pub mod holder;
pub mod redis_store;
pub mod registry;
pub mod store;

pub use agent::TunnelAgent;
pub use binding::BindingTable;
pub use coordinator::BindingCoordinator;
pub use holder::{ConnectionHolder, TunnelInfo, TunnelListener};
pub use redis_store::RedisStore;
pub use registry::{heartbeat_loop, LivenessRegistry};
pub use store::{AnyStore, KvStore, MemoryStore, StoreError};
