//! Background Tasks Module
//!
//! Contains the tasks that run detached from any caller.
//!
//! # Tasks
//! - Expiration timer: wakes a table when its next entry can expire

mod expiration;

pub(crate) use expiration::spawn_expiration_timer;
