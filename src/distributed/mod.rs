//! Oracle network processes
//!
//! # Architecture
//!
//! The oracle network has three kinds of process:
//!
//! - **Coordinator**: accepts queries, fans them out, aggregates the answers
//! - **Worker node**: answers tasks from the coordinator (HTTP) or the bus
//! - **Broker**: subject fan-out hub, only used by the bus topology
//!
//! # Modules
//!
//! - `protocol`: wire types and bus frame serialization
//! - `coordinator`: the coordinator façade
//! - `node_service`: worker node (HTTP server, registration, bus task loop)
//! - `broker`: TCP broker and its `TcpBus` client

pub mod broker;
pub mod coordinator;
pub mod node_service;
pub mod protocol;

// Re-export key types
pub use protocol::{
    BusFrame,
    OracleRequest,
    OracleResult,
    RegisterRequest,
    RegisterResponse,
    WorkerOutcome,
    PROTOCOL_VERSION,
};

pub use broker::{Broker, BrokerHandle, TcpBus};
pub use coordinator::{OracleCoordinator, RoundSettings};
pub use node_service::NodeService;
