//! Game simulation modules

pub mod entity;
pub mod physics;
pub mod room;

pub use room::{Room, RoomCommand, RoomHandle, RoomRegistry};
