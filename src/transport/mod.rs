// src/transport/mod.rs

pub(crate) mod endpoint;
