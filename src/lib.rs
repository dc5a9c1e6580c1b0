//! modelgate: runtime-declared record models over SQLite.
//!
//! Models are published at runtime as JSON definitions. Each one gets a
//! materialized table, generic create/list/get/update/delete operations, and
//! a role and ownership based access policy evaluated before every
//! operation.
//!
//! Layers, bottom-up:
//! - [`model`]: definitions, identities and the on-disk catalog
//! - [`schema`]: definition → table shape, materialization
//! - [`records`]: generic record operations
//! - [`authz`]: access decisions
//! - [`registry`]: the single publish point
//! - [`dispatch`]: resolve, authorize, execute
//! - [`server`]: HTTP surface

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub mod model;
pub mod records;
pub mod schema;

pub mod authz;
pub mod dispatch;
pub mod registry;

pub mod server;
