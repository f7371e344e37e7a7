// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! End to end reconciliation of the civic, OpenStreetMap and locker sources
//! into the display sets.

use crate::error::ConflationError;
use crate::feature::{Dataset, Feature, META_SOURCE_DATASET};
use crate::lockers::drop_mapped_lockers;
use crate::racks::{group_proximate_racks, rack_policy};
use crate::references::{
    IdentifierSet, OperatorMatcher, collect_claimed_ids, drop_matching, filter_crowd_sourced,
};
use crate::rings::{group_proximate_rings, ring_policy};
use crate::zones::{ExemptZone, partition_exempt};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

pub const BOLLARD: &str = "bollard";
pub const RACK: &str = "rack";

/// Which civic datasets play which role.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Operator name the civic authority is tagged with on OSM
    pub civic_authority: String,
    /// Key prefix of OSM tags referencing civic ids
    pub civic_reference_prefix: String,
    /// Dataset whose ring-and-post bollards get grouped
    pub ring_dataset: String,
    /// Datasets pooled for cross-source rack grouping
    pub rack_datasets: Vec<String>,
    /// Datasets copied to the output after reconciliation, no grouping
    pub passthrough_datasets: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            civic_authority: "City of Toronto".to_string(),
            civic_reference_prefix: "ref:open.toronto.ca".to_string(),
            ring_dataset: "street-furniture-bicycle-parking".to_string(),
            rack_datasets: vec![
                "bicycle-parking-high-capacity-outdoor".to_string(),
                "bicycle-parking-racks".to_string(),
                "street-furniture-bicycle-parking".to_string(),
            ],
            passthrough_datasets: vec!["bicycle-parking-bike-stations-indoor".to_string()],
        }
    }
}

impl PipelineConfig {
    fn is_configured(&self, name: &str) -> bool {
        self.ring_dataset == name
            || self.rack_datasets.iter().any(|d| d == name)
            || self.passthrough_datasets.iter().any(|d| d == name)
    }

    fn validate(&self, civic: &[Dataset]) -> Result<(), ConflationError> {
        let required = std::iter::once(&self.ring_dataset)
            .chain(&self.rack_datasets)
            .chain(&self.passthrough_datasets);
        for name in required {
            if !civic.iter().any(|d| d.name == *name) {
                return Err(ConflationError::MissingDataset(name.clone()));
            }
        }
        Ok(())
    }
}

/// Run-level state handed in by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineContext {
    pub run_date: NaiveDate,
    pub archive: bool,
}

impl PipelineContext {
    pub fn new(run_date: NaiveDate, archive: bool) -> Self {
        Self { run_date, archive }
    }

    /// Context for a run started now, dated in `tz`.
    pub fn today_in(tz: Tz, archive: bool) -> Self {
        Self::new(Utc::now().with_timezone(&tz).date_naive(), archive)
    }

    /// `archive/<YYYY-MM-DD>` when archiving is enabled.
    pub fn archive_dir(&self) -> Option<PathBuf> {
        self.archive
            .then(|| PathBuf::from("archive").join(self.run_date.format("%Y-%m-%d").to_string()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineInput {
    pub civic: Vec<Dataset>,
    pub crowd: Vec<Dataset>,
    pub lockers: Vec<Dataset>,
    pub exclusions: IdentifierSet,
    pub exempt_zones: Vec<ExemptZone>,
}

/// What each stage removed or merged.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub claimed_ids: usize,
    pub dropped_by_reference: usize,
    pub dropped_by_operator: usize,
    pub dropped_by_exclusion: usize,
    pub lockers_suppressed: usize,
    pub bollards_in: usize,
    pub bollards_out: usize,
    pub racks_exempt: usize,
    pub racks_in: usize,
    pub racks_out: usize,
}

/// The display sets produced by one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalSet {
    /// Civic records after reconciliation and grouping
    pub city: Vec<Feature>,
    /// Civic records after reconciliation, before grouping
    pub city_unclustered: Vec<Feature>,
    pub osm: Vec<Feature>,
    /// Civic lockers not yet mapped on OSM
    pub lockers: Vec<Feature>,
    pub all_sources: Vec<Feature>,
    pub stats: PipelineStats,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub city: usize,
    pub city_unclustered: usize,
    pub osm: usize,
    pub lockers: usize,
    pub all_sources: usize,
    #[serde(flatten)]
    pub stats: PipelineStats,
}

impl CanonicalSet {
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            city: self.city.len(),
            city_unclustered: self.city_unclustered.len(),
            osm: self.osm.len(),
            lockers: self.lockers.len(),
            all_sources: self.all_sources.len(),
            stats: self.stats.clone(),
        }
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "city: {} ({} before grouping)",
            self.city, self.city_unclustered
        )?;
        writeln!(f, "osm: {}", self.osm)?;
        writeln!(f, "lockers: {}", self.lockers)?;
        writeln!(f, "all sources: {}", self.all_sources)?;
        writeln!(
            f,
            "dropped: {} by reference ({} ids claimed), {} by operator, {} by exclusion, {} mapped lockers",
            self.stats.dropped_by_reference,
            self.stats.claimed_ids,
            self.stats.dropped_by_operator,
            self.stats.dropped_by_exclusion,
            self.stats.lockers_suppressed
        )?;
        write!(
            f,
            "grouped: {} bollards into {}, {} racks into {} ({} exempt)",
            self.stats.bollards_in,
            self.stats.bollards_out,
            self.stats.racks_in,
            self.stats.racks_out,
            self.stats.racks_exempt
        )
    }
}

/// Records without a dataset tag take the name of the dataset they were
/// loaded from, so the rack gate can tell civic sources apart.
fn tag_source_datasets(civic: &mut [Dataset]) {
    for dataset in civic.iter_mut() {
        let name = dataset.name.clone();
        for f in dataset.features.iter_mut() {
            if f.get(META_SOURCE_DATASET).is_none() {
                f.set(META_SOURCE_DATASET, name.as_str());
            }
        }
    }
}

fn flatten(datasets: Vec<Dataset>) -> Vec<Feature> {
    datasets.into_iter().flat_map(|d| d.features).collect()
}

fn drop_from_all(civic: &mut [Dataset], ids: &IdentifierSet) -> usize {
    let mut dropped = 0;
    for dataset in civic.iter_mut() {
        let (kept, n) = drop_matching(std::mem::take(&mut dataset.features), ids);
        dataset.features = kept;
        dropped += n;
    }
    dropped
}

fn features_of(civic: &[Dataset], name: &str) -> Vec<Feature> {
    civic
        .iter()
        .filter(|d| d.name == name)
        .flat_map(|d| d.features.iter().cloned())
        .collect()
}

/// Runs every reconciliation stage. Configuration problems (a named dataset
/// missing from `input`, an attribute with no aggregation rule) are reported
/// before any clustering.
pub fn run_pipeline(
    input: PipelineInput,
    config: &PipelineConfig,
    context: &PipelineContext,
) -> Result<CanonicalSet, ConflationError> {
    let PipelineInput {
        mut civic,
        crowd,
        lockers,
        exclusions,
        exempt_zones,
    } = input;

    config.validate(&civic)?;
    tag_source_datasets(&mut civic);
    let authority = OperatorMatcher::new(&config.civic_authority)?;
    let prefix = config.civic_reference_prefix.as_str();

    info!("Reconciling sources for {}", context.run_date);

    let crowd = flatten(crowd);
    let lockers = flatten(lockers);
    let mut stats = PipelineStats::default();

    // civic records already mapped on OSM
    let claimed = collect_claimed_ids(&crowd, prefix);
    stats.claimed_ids = claimed.len();
    stats.dropped_by_reference = drop_from_all(&mut civic, &claimed);

    let osm = filter_crowd_sourced(&crowd, prefix, &authority);
    stats.dropped_by_operator = crowd.len() - osm.len();

    stats.dropped_by_exclusion = drop_from_all(&mut civic, &exclusions);

    info!(
        "Dropped {} civic records claimed by {} OSM references, {} OSM records by operator, {} civic records by exclusion",
        stats.dropped_by_reference,
        stats.claimed_ids,
        stats.dropped_by_operator,
        stats.dropped_by_exclusion
    );

    let city_unclustered: Vec<Feature> = civic
        .iter()
        .flat_map(|d| d.features.iter().cloned())
        .collect();

    let unmapped_lockers = drop_mapped_lockers(&lockers, &crowd, &authority);
    stats.lockers_suppressed = lockers.len() - unmapped_lockers.len();

    let (bollards, ring_others): (Vec<Feature>, Vec<Feature>) =
        features_of(&civic, &config.ring_dataset)
            .into_iter()
            .partition(|f| f.is_parking_type(BOLLARD));

    // pool rack datasets; grouped bollards rejoin after the ring dataset's other records
    let mut pooled_racks = Vec::new();
    let mut not_racks = Vec::new();
    let mut bollard_slot = None;
    for name in &config.rack_datasets {
        let features = if *name == config.ring_dataset {
            ring_others.clone()
        } else {
            features_of(&civic, name)
        };
        let (racks, others): (Vec<Feature>, Vec<Feature>) =
            features.into_iter().partition(|f| f.is_parking_type(RACK));
        pooled_racks.extend(racks);
        not_racks.extend(others);
        if *name == config.ring_dataset {
            bollard_slot = Some(not_racks.len());
        }
    }
    if bollard_slot.is_none() {
        not_racks.extend(ring_others);
    }

    let (exempt_racks, racks) = partition_exempt(pooled_racks, &exempt_zones);

    ring_policy().validate(&bollards)?;
    rack_policy().validate(&racks)?;

    let grouped_bollards = group_proximate_rings(&bollards)?;
    stats.bollards_in = bollards.len();
    stats.bollards_out = grouped_bollards.len();

    let grouped_racks = group_proximate_racks(&racks)?;
    stats.racks_exempt = exempt_racks.len();
    stats.racks_in = racks.len();
    stats.racks_out = grouped_racks.len();

    info!(
        "Grouped {} bollards into {} and {} racks into {}, {} racks exempt",
        stats.bollards_in, stats.bollards_out, stats.racks_in, stats.racks_out, stats.racks_exempt
    );

    let after_bollards = not_racks.split_off(bollard_slot.unwrap_or(not_racks.len()));
    not_racks.extend(grouped_bollards);
    not_racks.extend(after_bollards);

    let mut city = grouped_racks;
    city.extend(exempt_racks);
    city.extend(not_racks);
    for name in &config.passthrough_datasets {
        city.extend(features_of(&civic, name));
    }
    for dataset in civic.iter().filter(|d| !config.is_configured(&d.name)) {
        warn!(
            "Civic dataset {} has no configured role, copying {} records through",
            dataset.name,
            dataset.len()
        );
        city.extend(dataset.features.iter().cloned());
    }

    let mut all_sources = city.clone();
    all_sources.extend(osm.iter().cloned());
    all_sources.extend(unmapped_lockers.iter().cloned());

    Ok(CanonicalSet {
        city,
        city_unclustered,
        osm,
        lockers: unmapped_lockers,
        all_sources,
        stats,
    })
}
