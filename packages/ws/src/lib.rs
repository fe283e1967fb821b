#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod handler;
pub mod models;
pub mod server;

/// Connection ID.
pub type ConnId = String;

/// Group name.
pub type GroupId = String;

/// Message sent to a connection.
pub type Msg = String;
