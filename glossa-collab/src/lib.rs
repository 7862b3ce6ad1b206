//! # glossa-collab — Real-time annotation sync
//!
//! Keeps a local [`glossa_core::AnnotationStore`] consistent with the
//! server-of-record: a persistent WebSocket push channel for inbound
//! fan-out, a request/response Persistence Gateway for durable writes, and
//! echo-based reconciliation between the two.
//!
//! ```text
//! ┌──────────────┐   POST/PATCH/DELETE    ┌──────────────┐
//! │  SyncClient  │ ─────────────────────► │  Persistence │
//! │  (per scope) │ ◄───────────────────── │   Gateway    │
//! └──────┬───────┘    confirmed record    └──────┬───────┘
//!        │                                       │ fan-out
//!        │ WebSocket         ┌───────────────────┘
//!        ▼                   ▼
//! ┌──────────────┐    created/updated/deleted
//! │ push channel │ ◄── broadcasts, own echo included
//! └──────┬───────┘
//!        │ apply (idempotent by id)
//!        ▼
//! ┌──────────────────┐
//! │ AnnotationStore  │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON channel envelope ([`ChannelMessage`])
//! - [`gateway`] — HTTP CRUD adapter ([`PersistenceGateway`])
//! - [`client`] — [`SyncClient`]: connection lifecycle state machine with
//!   exponential backoff, scope filtering, optimistic local mutation
//! - [`subscription`] — one shared connection per scope, reference counted

pub mod client;
pub mod gateway;
pub mod protocol;
pub mod subscription;

pub use client::{
    ConnectionState, ReconnectPolicy, SyncClient, SyncConfig, SyncError, SyncEvent,
};
pub use gateway::{GatewayConfig, GatewayError, PersistenceGateway, IDENTITY_HEADER};
pub use protocol::{ChannelMessage, ProtocolError};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
