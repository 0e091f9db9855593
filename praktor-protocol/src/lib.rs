//! # praktor-protocol
//!
//! Subject layout ([`topics`]) and wire envelopes ([`envelope`], [`ipc`]) for
//! the praktor agent bus. This crate has no runtime behavior of
//! its own — it's the one place the hierarchical subject strings and JSON
//! shapes are defined, so every other crate (and, out of process, the agent
//! containers) agrees on them by construction rather than by convention.

pub mod envelope;
pub mod ipc;
pub mod topics;

pub use envelope::{
    AgentInputEnvelope, AgentOutputEnvelope, ControlCommand, EventEnvelope, IpcRequest,
    IpcResponse, RouteRequest, RouteResponse, SwarmChatMessage,
};
pub use ipc::{
    CreateTaskPayload, DeleteTaskPayload, ExtensionStatusPayload, SendFilePayload,
    SwarmMessagePayload, UpdateTaskPayload, UserMdPayload,
};
