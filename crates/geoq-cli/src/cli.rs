use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "geoq",
    about = "geoq: geohash planning and radius queries over documents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Encode a coordinate as a geohash
    Encode(EncodeArgs),
    /// Show how many geohash bits a circle needs
    Bits(BitsArgs),
    /// List the geohash ranges that cover a circle
    Ranges(RangesArgs),
    /// Great-circle distance between two coordinates
    Distance(DistanceArgs),
    /// Run a radius query over a JSON fixture
    Near(NearArgs),
}

#[derive(Args)]
pub struct PointArgs {
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,
}

#[derive(Args)]
pub struct PrecisionArgs {
    /// Geohash length of stored documents
    #[arg(short, long)]
    pub precision: Option<usize>,
    /// TOML file with query configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub point: PointArgs,
    #[arg(short, long, default_value = "10")]
    pub precision: usize,
}

#[derive(Args)]
pub struct BitsArgs {
    #[command(flatten)]
    pub point: PointArgs,
    /// Radius in meters
    pub radius: f64,
}

#[derive(Args)]
pub struct RangesArgs {
    #[command(flatten)]
    pub point: PointArgs,
    /// Radius in meters
    pub radius: f64,
    #[command(flatten)]
    pub precision: PrecisionArgs,
}

#[derive(Args)]
pub struct DistanceArgs {
    #[arg(allow_negative_numbers = true)]
    pub from_latitude: f64,
    #[arg(allow_negative_numbers = true)]
    pub from_longitude: f64,
    #[arg(allow_negative_numbers = true)]
    pub to_latitude: f64,
    #[arg(allow_negative_numbers = true)]
    pub to_longitude: f64,
}

#[derive(Args)]
pub struct NearArgs {
    #[command(flatten)]
    pub point: PointArgs,
    /// Radius in meters
    pub radius: f64,
    /// JSON array of `{"id": ..., "data": {...}}` objects
    #[arg(long)]
    pub data: PathBuf,
    /// Payload field holding each document's coordinates
    #[arg(long)]
    pub coordinates_key: Option<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// A `where` clause; repeatable
    #[arg(long = "where", num_args = 3, value_names = ["FIELD", "OP", "VALUE"])]
    pub filters: Vec<String>,
    #[command(flatten)]
    pub precision: PrecisionArgs,
}
