//! A rust library for fragmented storage and parallel population of multidimensional
//! datacubes.
//!
//! A datacube's logical row space is split into fragments, each holding a contiguous
//! 1-based key range. The [`partition`] planner turns a size request and placement hints
//! into a feasible `(hosts, fragments per database, tuples per fragment)` topology, the
//! key-range allocator derives every fragment's key range in closed form, and the
//! [`executor`] populates all fragments on two nested tiers of deterministic,
//! non-cooperative workers with all-or-nothing semantics.
//!
//! ## Example
//! ```rust,ignore
//! # use std::sync::Arc;
//! use cubefrag::executor::ExecutionContext;
//! use cubefrag::partition::{PartitionHints, PartitionRequest};
//!
//! let ctx = ExecutionContext::new(catalog, fragment_store, dimension_store);
//! let request = PartitionRequest::new(10_000, 10_000, PartitionHints::new(4, 2), 4);
//! let datacube = cubefrag::executor::populate_datacube(
//!     &ctx, &request, &source, false, dimension_instances,
//! )?;
//! for row in cubefrag::executor::scan_datacube(&ctx, datacube.id)? {
//!     let row = row?;
//!     println!("{}: {:?}", row.key, row.value);
//! }
//! # Ok::<(), cubefrag::executor::ExecutionError>(())
//! ```
//!
//! ## Crate Features
//! #### Default
//!  - `gzip`: gzip compression of fragment payloads.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
// #![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod catalog;
pub mod config;
pub mod datacube;
pub mod dimension;
pub mod distribution;
pub mod executor;
pub mod fragment_id_set;
pub mod hierarchy;
pub mod materializer;
pub mod partition;
pub mod source;
