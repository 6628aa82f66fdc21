//! Wire types shared between the store-facing API crate and the server.

pub mod api;
pub mod models;
