use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use geoq_query::{GeoQuery, NearCriteria, QueryConfig, QuerySnapshot};
use geoq_store::{encode_set_document, DocumentStore, GetOptions, InMemoryDocumentStore, WhereOp};
use geoq_types::{DocumentId, GeoPoint};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Encode(args) => cmd_encode(args, format),
        Command::Bits(args) => cmd_bits(args, format),
        Command::Ranges(args) => cmd_ranges(args, format),
        Command::Distance(args) => cmd_distance(args, format),
        Command::Near(args) => cmd_near(args, format),
    }
}

fn cmd_encode(args: EncodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let point = args.point.to_point()?;
    let hash = geoq_hash::encode(&point, args.precision)?;
    match format {
        OutputFormat::Json => print_json(&json!({ "location": point, "geohash": hash })),
        OutputFormat::Text => {
            println!("{}", hash.as_str().yellow().bold());
            Ok(())
        }
    }
}

fn cmd_bits(args: BitsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let center = args.point.to_point()?;
    let bits = geoq_hash::bounding_box_bits(&center, args.radius)?;
    match format {
        OutputFormat::Json => print_json(&json!({ "center": center, "radius": args.radius, "bits": bits })),
        OutputFormat::Text => {
            println!(
                "{} bits ({} m around {})",
                bits.to_string().bold(),
                args.radius,
                center.to_string().cyan()
            );
            Ok(())
        }
    }
}

fn cmd_ranges(args: RangesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let center = args.point.to_point()?;
    let config = resolve_config(&args.precision)?;
    let ranges = geoq_hash::geohash_queries(&center, args.radius, config.precision)?;
    match format {
        OutputFormat::Json => print_json(&json!(ranges)),
        OutputFormat::Text => {
            for range in &ranges {
                println!("  {} .. {}", range.start.green(), range.end.green());
            }
            println!("{} ranges at precision {}", ranges.len().to_string().bold(), config.precision);
            Ok(())
        }
    }
}

fn cmd_distance(args: DistanceArgs, format: OutputFormat) -> anyhow::Result<()> {
    let from = GeoPoint::new(args.from_latitude, args.from_longitude)?;
    let to = GeoPoint::new(args.to_latitude, args.to_longitude)?;
    let km = geoq_hash::calculate_distance(&from, &to)?;
    match format {
        OutputFormat::Json => print_json(&json!({ "from": from, "to": to, "kilometers": km })),
        OutputFormat::Text => {
            println!("{} km", format!("{km:.3}").bold());
            Ok(())
        }
    }
}

fn cmd_near(args: NearArgs, format: OutputFormat) -> anyhow::Result<()> {
    let center = args.point.to_point()?;
    let config = resolve_config(&args.precision)?;
    let contents = std::fs::read_to_string(&args.data)
        .with_context(|| format!("reading {}", args.data.display()))?;

    let store = Arc::new(InMemoryDocumentStore::new());
    let loaded = load_fixture(&store, &contents, args.coordinates_key.as_deref(), config.precision)?;
    debug!(documents = loaded, path = %args.data.display(), "fixture loaded");

    let store: Arc<dyn DocumentStore> = store;
    let mut query = GeoQuery::with_config(store, config)?
        .near(NearCriteria::new(center, args.radius))?;
    for (field, op, value) in parse_filters(&args.filters)? {
        query = query.filter(&field, op, value)?;
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let snapshot = runtime.block_on(query.get(GetOptions::default()))?;
    match format {
        OutputFormat::Json => print_json(&snapshot),
        OutputFormat::Text => {
            print_snapshot(&snapshot);
            Ok(())
        }
    }
}

impl PointArgs {
    fn to_point(&self) -> anyhow::Result<GeoPoint> {
        Ok(GeoPoint::new(self.latitude, self.longitude)?)
    }
}

/// Configuration from `--config`, with `--precision` taking precedence.
fn resolve_config(args: &PrecisionArgs) -> anyhow::Result<QueryConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => QueryConfig::default(),
    };
    if let Some(precision) = args.precision {
        config.precision = precision;
        config.validate()?;
    }
    Ok(config)
}

fn load_config(path: &Path) -> anyhow::Result<QueryConfig> {
    QueryConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

#[derive(Deserialize)]
struct FixtureEntry {
    id: Option<String>,
    data: serde_json::Map<String, Value>,
}

/// Load a JSON array of `{id, data}` objects into `store`. Entries without
/// an id get a generated one. Returns the number of documents written.
fn load_fixture(
    store: &InMemoryDocumentStore,
    contents: &str,
    coordinates_key: Option<&str>,
    precision: usize,
) -> anyhow::Result<usize> {
    let entries: Vec<FixtureEntry> =
        serde_json::from_str(contents).context("fixture must be a JSON array of {id, data}")?;
    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let id = entry.id.map(DocumentId::new).unwrap_or_else(DocumentId::generate);
        let doc = encode_set_document(entry.data, coordinates_key, precision)
            .with_context(|| format!("fixture entry {i} ({id})"))?;
        store.set(id, doc);
    }
    Ok(count)
}

/// Group `--where FIELD OP VALUE` triples. Values are JSON; anything that
/// does not parse as JSON is taken as a string.
fn parse_filters(raw: &[String]) -> anyhow::Result<Vec<(String, WhereOp, Value)>> {
    if raw.len() % 3 != 0 {
        bail!("--where takes a field, an operator and a value");
    }
    raw.chunks(3)
        .map(|clause| {
            let op: WhereOp = clause[1].parse()?;
            let value = serde_json::from_str(&clause[2])
                .unwrap_or_else(|_| Value::String(clause[2].clone()));
            Ok((clause[0].clone(), op, value))
        })
        .collect()
}

fn print_snapshot(snapshot: &QuerySnapshot) {
    if snapshot.is_empty() {
        println!("No documents in range.");
        return;
    }
    for doc in snapshot.docs() {
        let distance = doc
            .distance_meters()
            .map(|m| format!("{m:.1} m"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>4}  {}  {}  {}",
            doc.rank().to_string().dimmed(),
            doc.id().as_str().yellow().bold(),
            distance.cyan(),
            doc.data()
        );
    }
    println!("{} documents", snapshot.size().to_string().bold());
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
