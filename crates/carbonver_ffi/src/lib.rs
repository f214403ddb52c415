//! Flutter-facing bindings for the carbon verification core.

pub mod api;
