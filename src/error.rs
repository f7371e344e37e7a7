// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Error type shared by the conflation core and the file driver.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConflationError {
    #[error("No aggregation rule for attribute '{field}' in the {policy} policy")]
    MissingAggregationRule { policy: &'static str, field: String },
    #[error("Invalid clustering parameters: radius {radius}, min_members {min_members}")]
    InvalidClusterParameters { radius: f64, min_members: usize },
    #[error("Configured dataset '{0}' is missing from the pipeline input")]
    MissingDataset(String),
    #[error("Cannot build an operator pattern from authority name '{0}'")]
    InvalidAuthorityName(String),
    #[error("Malformed exclusion entry: {0}")]
    MalformedExclusion(String),
    #[error("Unsupported geometry in dataset '{dataset}': {kind}")]
    UnsupportedGeometry { dataset: String, kind: String },
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

macro_rules! io_err {
    ($path:expr, $err:expr) => {
        $crate::error::ConflationError::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;
