//! The `distance` command: one-shot haversine between two coordinates.

use clap::Args;

use nearserve::geo::{distance_km, format_distance, validate_coordinates};

/// Arguments for `nearserve distance`.
#[derive(Debug, Args)]
pub struct DistanceArgs {
    /// Origin latitude in decimal degrees.
    #[arg(long)]
    pub from_lat: f64,

    /// Origin longitude in decimal degrees.
    #[arg(long)]
    pub from_lng: f64,

    /// Destination latitude in decimal degrees.
    #[arg(long)]
    pub to_lat: f64,

    /// Destination longitude in decimal degrees.
    #[arg(long)]
    pub to_lng: f64,
}

/// Prints the distance, or an error for out-of-range coordinates.
pub fn run(args: DistanceArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !validate_coordinates(args.from_lat, args.from_lng)
        || !validate_coordinates(args.to_lat, args.to_lng)
    {
        return Err("coordinates out of range (lat -90..90, lng -180..180)".into());
    }

    let km = distance_km(args.from_lat, args.from_lng, args.to_lat, args.to_lng);
    println!("{km} km ({})", format_distance(Some(km)));
    Ok(())
}
