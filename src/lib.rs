// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_unit_value,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Reconciles bicycle parking records from civic open data feeds,
//! OpenStreetMap and the civic locker listing into one deduplicated set.

pub mod aggregation;
pub mod dbscan;
pub mod error;
pub mod feature;
pub mod geojson_io;
pub mod lockers;
pub mod pipeline;
pub mod projection;
pub mod racks;
pub mod references;
pub mod rings;
pub mod zones;

pub use error::ConflationError;
pub use feature::{Dataset, Feature};
pub use pipeline::{CanonicalSet, PipelineConfig, PipelineContext, PipelineInput, run_pipeline};
