// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//cargo run --bin juniper --release -- --manifest sources.json --input-dir "Output Files" --output-dir "Display Files" --exclusions exclusions.json

use anyhow::{Context, Result};
use bikeparking::feature::{Dataset, Feature};
use bikeparking::geojson_io::{load_exclusions, load_exempt_zones, load_normalized_dataset, write_geojson};
use bikeparking::references::IdentifierSet;
use bikeparking::{CanonicalSet, PipelineConfig, PipelineContext, PipelineInput, run_pipeline};
use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source manifest listing the city, osm and lockers datasets
    #[arg(long, env = "JUNIPER_MANIFEST")]
    manifest: PathBuf,

    /// Folder holding `<dataset>-normalized.geojson` files
    #[arg(long, env = "JUNIPER_INPUT_DIR")]
    input_dir: PathBuf,

    /// Folder the display files are written to
    #[arg(long, env = "JUNIPER_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Manual exclusion list of civic ids
    #[arg(long, env = "JUNIPER_EXCLUSIONS")]
    exclusions: Option<PathBuf>,

    /// GeoJSON polygons whose racks are never grouped
    #[arg(long, env = "JUNIPER_EXEMPT_ZONES")]
    exempt_zones: Option<PathBuf>,

    /// Dataset roles as JSON; defaults to the Toronto layout
    #[arg(long, env = "JUNIPER_CONFIG")]
    config: Option<PathBuf>,

    /// Also write a copy to archive/<date>/ inside the output folder
    #[arg(short, long)]
    archive: bool,

    /// Run date, defaults to today in Toronto
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Remove meta_* attributes from the written files
    #[arg(long)]
    strip_meta: bool,
}

#[derive(Deserialize, Debug, Default)]
struct SourceManifest {
    #[serde(default)]
    city: SourceGroup,
    #[serde(default)]
    osm: SourceGroup,
    #[serde(default)]
    lockers: SourceGroup,
}

#[derive(Deserialize, Debug, Default)]
struct SourceGroup {
    #[serde(default)]
    datasets: Vec<SourceEntry>,
}

#[derive(Deserialize, Debug)]
struct SourceEntry {
    dataset_name: String,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_group(input_dir: &Path, group: &SourceGroup) -> Result<Vec<Dataset>> {
    group
        .datasets
        .iter()
        .map(|entry| {
            load_normalized_dataset(input_dir, &entry.dataset_name)
                .with_context(|| format!("Failed to load dataset {}", entry.dataset_name))
        })
        .collect()
}

fn display_files(output: &CanonicalSet) -> [(&'static str, &[Feature]); 5] {
    [
        ("open_toronto_ca.geojson", output.city.as_slice()),
        ("open_toronto_ca_unclustered.geojson", output.city_unclustered.as_slice()),
        ("openstreetmap.geojson", output.osm.as_slice()),
        ("toronto_lockers.geojson", output.lockers.as_slice()),
        ("all_sources.geojson", output.all_sources.as_slice()),
    ]
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let context = match args.date {
        Some(date) => PipelineContext::new(date, args.archive),
        None => PipelineContext::today_in(chrono_tz::America::Toronto, args.archive),
    };

    let config: PipelineConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => PipelineConfig::default(),
    };

    let manifest: SourceManifest = read_json(&args.manifest)?;

    let civic = load_group(&args.input_dir, &manifest.city)?;
    let crowd = load_group(&args.input_dir, &manifest.osm)?;
    let lockers = load_group(&args.input_dir, &manifest.lockers)?;

    let exclusions = match &args.exclusions {
        Some(path) => load_exclusions(path)
            .with_context(|| format!("Failed to load exclusions from {}", path.display()))?,
        None => IdentifierSet::new(),
    };

    let exempt_zones = match &args.exempt_zones {
        Some(path) => load_exempt_zones(path)
            .with_context(|| format!("Failed to load exemption zones from {}", path.display()))?,
        None => Vec::new(),
    };

    info!(
        "Loaded {} civic, {} osm and {} locker datasets, {} exclusions, {} exemption zones",
        civic.len(),
        crowd.len(),
        lockers.len(),
        exclusions.len(),
        exempt_zones.len()
    );

    let unprocessed: Vec<Feature> = civic
        .iter()
        .chain(&crowd)
        .chain(&lockers)
        .flat_map(|d| d.features.iter().cloned())
        .collect();

    let output = run_pipeline(
        PipelineInput {
            civic,
            crowd,
            lockers,
            exclusions,
            exempt_zones,
        },
        &config,
        &context,
    )
    .context("Reconciliation failed")?;

    let mut targets = vec![args.output_dir.clone()];
    if let Some(archive) = context.archive_dir() {
        info!("Archiving to {}", archive.display());
        targets.push(args.output_dir.join(archive));
    }

    for dir in &targets {
        for (file_name, features) in display_files(&output) {
            write_geojson(&dir.join(file_name), features, args.strip_meta)
                .with_context(|| format!("Failed to write {file_name}"))?;
        }
        write_geojson(
            &dir.join("all_normalized_unprocessed.geojson"),
            &unprocessed,
            args.strip_meta,
        )
        .context("Failed to write all_normalized_unprocessed.geojson")?;
    }

    for line in output.summary().to_string().lines() {
        info!("{}", line);
    }

    Ok(())
}
