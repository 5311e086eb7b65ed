//! Management API for editing the configuration store at runtime.

pub(crate) mod api;

pub(crate) use api::ControlApi;
