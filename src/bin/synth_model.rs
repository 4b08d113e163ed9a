//! Synthetic Velocity Model Generator
//!
//! Writes a two-layer spherical velocity model (crust over mantle, each with a
//! constant velocity gradient with depth) over a latitude/longitude/depth box.
//! Useful for producing quick inputs for `tt-inventory build`.
//!
//! # Usage
//! ```bash
//! tt-synth-model --phase P --lat 9,11 --lon 19,21 --output vp.json.zst
//! tt-synth-model --phase S --lat 9,11 --lon 19,21 --output vs.json.zst
//! ```

use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tt_inventory::config::defaults::EARTH_RADIUS_KM;
use tt_inventory::field::{CoordSys, FieldGeometry, ScalarField3D};
use tt_inventory::types::Phase;

// ============================================================================
// Velocity Profile Constants
// ============================================================================

/// P velocity at the top of the crust (km/s)
const CRUST_VP_KM_S: f64 = 6.0;
/// Crustal P velocity gradient (km/s per km)
const CRUST_GRADIENT: f64 = 0.01;
/// P velocity just below the Moho (km/s)
const MANTLE_VP_KM_S: f64 = 8.0;
/// Upper-mantle P velocity gradient (km/s per km)
const MANTLE_GRADIENT: f64 = 0.003;
/// Vp/Vs ratio of a Poisson solid
const VP_VS_RATIO: f64 = 1.732;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tt-synth-model")]
#[command(about = "Write a layered spherical velocity model for tt-inventory")]
#[command(version)]
struct Args {
    /// Wave phase the model is for
    #[arg(long, default_value = "P")]
    phase: Phase,

    /// Latitude range in degrees, "south,north"
    #[arg(long, value_parser = parse_range)]
    lat: (f64, f64),

    /// Longitude range in degrees, "west,east"
    #[arg(long, value_parser = parse_range)]
    lon: (f64, f64),

    /// Deepest point of the model (km below sea level)
    #[arg(long, default_value = "60")]
    max_depth_km: f64,

    /// Highest point of the model (km above sea level)
    #[arg(long, default_value = "2")]
    top_km: f64,

    /// Depth of the crust-mantle boundary (km)
    #[arg(long, default_value = "35")]
    moho_km: f64,

    /// Nodes along radius, latitude and longitude
    #[arg(long, default_value = "21,21,21", value_parser = parse_npts)]
    npts: [usize; 3],

    /// Output file (.json, or .zst for compressed)
    #[arg(short, long)]
    output: PathBuf,
}

fn parse_range(s: &str) -> Result<(f64, f64), String> {
    let (a, b) = s
        .split_once(',')
        .ok_or_else(|| format!("expected 'min,max', got '{s}'"))?;
    let a: f64 = a.trim().parse().map_err(|e| format!("invalid number '{a}': {e}"))?;
    let b: f64 = b.trim().parse().map_err(|e| format!("invalid number '{b}': {e}"))?;
    if a >= b {
        return Err(format!("range start {a} must be below end {b}"));
    }
    Ok((a, b))
}

fn parse_npts(s: &str) -> Result<[usize; 3], String> {
    let parts: Vec<usize> = s
        .split(',')
        .map(|v| v.trim().parse::<usize>().map_err(|e| format!("invalid count '{v}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        &[a, b, c] if a > 0 && b > 0 && c > 0 => Ok([a, b, c]),
        _ => Err(format!("expected three positive counts, got '{s}'")),
    }
}

/// P velocity (km/s) at `depth_km` below sea level. Material above sea level
/// takes the surface value.
fn p_velocity(depth_km: f64, moho_km: f64) -> f64 {
    let depth = depth_km.max(0.0);
    if depth < moho_km {
        CRUST_VP_KM_S + CRUST_GRADIENT * depth
    } else {
        MANTLE_VP_KM_S + MANTLE_GRADIENT * (depth - moho_km)
    }
}

/// Node spacing covering `[lo, hi]` with `n` nodes.
fn interval(lo: f64, hi: f64, n: usize) -> f64 {
    if n > 1 {
        (hi - lo) / (n - 1) as f64
    } else {
        1.0
    }
}

fn build_model(args: &Args) -> Result<ScalarField3D> {
    ensure!(
        (-90.0..=90.0).contains(&args.lat.0) && (-90.0..=90.0).contains(&args.lat.1),
        "latitude must be within -90..90"
    );
    ensure!(args.max_depth_km > -args.top_km, "model must have positive thickness");

    let [nr, nt, np] = args.npts;
    // Radius grows outwards; colatitude grows southwards, so theta starts at
    // the northern edge.
    let rho_min = EARTH_RADIUS_KM - args.max_depth_km;
    let rho_max = EARTH_RADIUS_KM + args.top_km;
    let theta_min = (90.0 - args.lat.1).to_radians();
    let theta_max = (90.0 - args.lat.0).to_radians();
    let phi_min = args.lon.0.to_radians();
    let phi_max = args.lon.1.to_radians();

    let geometry = FieldGeometry {
        coord_sys: CoordSys::Spherical,
        min_coords: [rho_min, theta_min, phi_min],
        node_intervals: [
            interval(rho_min, rho_max, nr),
            interval(theta_min, theta_max, nt),
            interval(phi_min, phi_max, np),
        ],
        npts: args.npts,
    };

    let scale = match args.phase {
        Phase::P => 1.0,
        Phase::S => 1.0 / VP_VS_RATIO,
    };
    let moho = args.moho_km;
    ScalarField3D::from_fn(geometry, |[rho, _, _]| {
        p_velocity(EARTH_RADIUS_KM - rho, moho) * scale
    })
    .context("building model grid")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let model = build_model(&args)?;
    model
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    let (vmin, vmax) = model.value_range();
    info!(
        phase = %args.phase,
        npts = ?model.npts(),
        path = %args.output.display(),
        "Wrote velocity model ({vmin:.2}-{vmax:.2} km/s)"
    );
    Ok(())
}
