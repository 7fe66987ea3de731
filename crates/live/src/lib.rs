//! The live-component runtime core.
//!
//! A [`LiveRuntime`] hosts named component instances on behalf of
//! connected clients: it owns the component registry, the room manager,
//! and the room event bus, and is handed to the transport layer by
//! reference. Tests build a private runtime per case; nothing in this
//! crate is process-global.
//!
//! Concurrency discipline:
//! - actions on one instance are serialized behind a per-instance mutex,
//!   held for the action call plus its state flush;
//! - room-event handlers run on the fanout path, outside the instance
//!   lock, and must not block;
//! - every frame a client sees goes through its connection's single
//!   writer, so per-connection ordering is FIFO.

pub mod bus;
pub mod component;
pub mod error;
pub mod gate;
pub mod instance;
pub mod registry;
pub mod rooms;
pub mod runtime;
pub mod sink;
pub mod testing;

pub use {
    bus::{BusStats, RoomEvent, RoomEventBus, RoomEventCallback, SubscriptionId},
    component::{
        ActionAuth, ActionResult, ComponentAuth, ComponentDef, Cx, LiveComponent, RoomCx,
    },
    error::{ActionError, Error, Result},
    gate::Denial,
    instance::InstanceCell,
    registry::ComponentRegistry,
    rooms::{RoomManager, RoomMessage},
    runtime::{LiveRuntime, RoomStats, RuntimeStats, Services},
    sink::ClientSink,
};
