//! # Pkgvis Crate Overview
//!
//! Pkgvis is the package visibility filter of a multi-user package-management
//! service: for every pair of installed applications it decides whether one
//! may observe the other. Applications are mutually invisible by default and
//! become visible only through a small set of declared or runtime-established
//! relationships.
//!
//! ## Highlights
//! - In-memory relation store tracking force-queryable, package-name,
//!   component, and runtime-granted visibility edges.
//! - Materialized cross-user decision cache, rebuilt asynchronously at
//!   system-ready and maintained incrementally afterwards.
//! - A fixed-precedence decision engine ([`VisibilityFilter::should_filter`])
//!   that denies visibility whenever the system state is in doubt.
//! - External collaborators (package table, feature switches, overlay
//!   mapper, background executor) behind narrow traits, so hosts and tests
//!   wire in their own.
//!
//! ## Crate Layout
//! - [`filter`]: the façade — decision engine, incremental maintenance, and
//!   the asynchronous cache rebuild protocol.
//! - [`store`], [`cache`]: the relation graph and the materialized verdicts.
//! - [`package`], [`manifest`], [`intent`], [`ids`]: the externally-supplied
//!   data model and the pure matching algorithms over it.
//! - [`provider`], [`config`], [`overlay`], [`exec`]: collaborator traits
//!   with default in-memory implementations.
//! - [`dump`], [`logging`]: diagnostics.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use pkgvis::config::{DeviceConfig, DeviceFeatureConfig};
//! use pkgvis::exec::ImmediateExecutor;
//! use pkgvis::overlay::NoOverlay;
//! use pkgvis::provider::MemoryStateProvider;
//! use pkgvis::VisibilityFilter;
//!
//! let provider = Arc::new(MemoryStateProvider::new(vec![0]));
//! let filter = Arc::new(VisibilityFilter::new(
//!     provider.clone(),
//!     Arc::new(DeviceFeatureConfig::new()),
//!     Arc::new(NoOverlay),
//!     Arc::new(ImmediateExecutor),
//!     &DeviceConfig::default(),
//! ));
//! filter.on_system_ready();
//! assert!(filter.cache_ready());
//! ```

pub mod cache;
pub mod config;
pub mod dump;
pub mod exec;
pub mod filter;
pub mod ids;
pub mod intent;
pub mod logging;
pub mod manifest;
pub mod overlay;
pub mod package;
pub mod provider;
pub mod store;

pub use filter::VisibilityFilter;
pub use ids::{AppId, FIRST_APP_ID, Uid, UserId, uid};
pub use package::{PackageRef, PackageSetting, Setting};
