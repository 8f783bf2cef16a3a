//! rustred CLI - Command-line interface for binning and unit conversion.
//!
//! Prints the bin edges a rebin or resample request would produce and
//! converts single values between units for one detector, as JSON.
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use thiserror::Error;

use rustred_core::{
    create_axis_from_rebin_params, ConversionConfig, DetectorGeometry, DetectorTable, EnergyMode,
    RaggedBinning, RebinParams, SimpleInstrument, Unit, UnitsConversionHelper,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("Core error: {0}")]
    Core(#[from] rustred_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Binning and unit conversion for neutron time-of-flight data.
#[derive(Parser)]
#[command(name = "rustred")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bin edges from rebin parameters "x0,step,x1[,step,x2...]" or a bare width
    Bins {
        /// Rebin parameters; a negative step means logarithmic binning
        params: String,

        /// Drop a partial last bin instead of widening the previous one
        #[arg(long)]
        full_bins_only: bool,

        /// Lower X bound used with a bare bin width
        #[arg(long, allow_negative_numbers = true)]
        xmin: Option<f64>,

        /// Upper X bound used with a bare bin width
        #[arg(long, allow_negative_numbers = true)]
        xmax: Option<f64>,
    },

    /// Fixed-count bin edges between two values
    ResampleEdges {
        /// Lower bound
        #[arg(allow_negative_numbers = true)]
        xmin: f64,

        /// Upper bound
        #[arg(allow_negative_numbers = true)]
        xmax: f64,

        /// Number of bins
        #[arg(short, long, default_value = "100")]
        bins: usize,

        /// Logarithmic binning
        #[arg(long)]
        log: bool,

        /// Produce bin centres instead of boundaries
        #[arg(long)]
        points: bool,
    },

    /// Convert values between units for a single detector
    Convert {
        /// Source unit name (e.g. TOF, Wavelength, dSpacing)
        #[arg(long, default_value = "TOF")]
        from: String,

        /// Target unit name
        #[arg(long)]
        to: String,

        /// Source-to-sample distance (m)
        #[arg(long, default_value = "10.0")]
        l1: f64,

        /// Sample-to-detector distance (m)
        #[arg(long, default_value = "2.0")]
        l2: f64,

        /// Scattering angle (degrees)
        #[arg(long, default_value = "90.0")]
        two_theta: f64,

        /// Energy mode: Elastic, Direct or Indirect
        #[arg(long, default_value = "Elastic")]
        emode: String,

        /// Fixed energy (meV)
        #[arg(long)]
        efixed: Option<f64>,

        /// Calibrated DIFC; enables the diffractometer calibration
        #[arg(long)]
        difc: Option<f64>,

        /// Calibrated DIFA
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        difa: f64,

        /// Calibrated TZERO
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        tzero: f64,

        /// Always convert through TOF
        #[arg(long)]
        via_tof: bool,

        /// Values to convert
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
    },

    /// List the known units
    Units,
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

fn bins(
    params: &str,
    full_bins_only: bool,
    xmin: Option<f64>,
    xmax: Option<f64>,
) -> Result<serde_json::Value> {
    let params: RebinParams = params.parse()?;
    let hints = match (xmin, xmax) {
        (Some(lo), Some(hi)) => Some((lo, hi)),
        (None, None) => None,
        _ => {
            return Err(CliError::InvalidArgument(
                "--xmin and --xmax must be given together".into(),
            ))
        }
    };
    let edges = create_axis_from_rebin_params(params.as_slice(), full_bins_only, hints)?;
    Ok(json!({
        "params": params,
        "n_bins": edges.len().saturating_sub(1),
        "edges": edges,
    }))
}

fn resample_edges(
    xmin: f64,
    xmax: f64,
    bins: usize,
    log: bool,
    points: bool,
) -> Result<serde_json::Value> {
    let request = RaggedBinning::new(bins).with_log(log).with_point_data(points);
    let outcome = request.determine(xmin, xmax)?;
    Ok(json!({
        "request": request,
        "outcome": outcome,
    }))
}

fn convert(
    from: &str,
    to: &str,
    detector: DetectorGeometry,
    l1: f64,
    conversion: ConversionConfig,
    values: &[f64],
) -> Result<serde_json::Value> {
    let source: Unit = from.parse()?;
    let target: Unit = to.parse()?;
    let instrument = SimpleInstrument::new("cli", l1).with_detector(1, detector);
    let spectra = [BTreeSet::from([1])];
    let table = DetectorTable::build(&instrument, spectra.iter())?;
    let mut helper = UnitsConversionHelper::new(source, target, conversion, Arc::new(table))?;
    helper.update_conversion(0)?;
    let (lo, hi) = helper.get_conversion_range(f64::NEG_INFINITY, f64::INFINITY);
    let converted: Vec<Option<f64>> = values
        .iter()
        .map(|&value| {
            if (lo..=hi).contains(&value) {
                Some(helper.convert_units(value))
            } else {
                log::warn!(
                    "{} {} is outside the convertible range [{}, {}]",
                    value,
                    source,
                    lo,
                    hi
                );
                None
            }
        })
        .collect();
    Ok(json!({
        "from": source.name(),
        "to": target.name(),
        "mode": helper.mode(),
        "valid_range": [lo, hi],
        "values": values,
        "converted": converted,
    }))
}

fn units() -> serde_json::Value {
    Unit::ALL
        .iter()
        .map(|unit| {
            json!({
                "name": unit.name(),
                "label": unit.label(),
                "inelastic": unit.requires_inelastic(),
            })
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Bins {
            params,
            full_bins_only,
            xmin,
            xmax,
        } => bins(&params, full_bins_only, xmin, xmax)?,

        Commands::ResampleEdges {
            xmin,
            xmax,
            bins,
            log,
            points,
        } => resample_edges(xmin, xmax, bins, log, points)?,

        Commands::Convert {
            from,
            to,
            l1,
            l2,
            two_theta,
            emode,
            efixed,
            difc,
            difa,
            tzero,
            via_tof,
            values,
        } => {
            let emode: EnergyMode = emode.parse()?;
            let mut detector = DetectorGeometry::new(l2, two_theta.to_radians());
            if let Some(difc) = difc {
                detector = detector.with_calibration(difa, difc, tzero);
            }
            let mut conversion = ConversionConfig::default()
                .with_emode(emode)
                .with_force_via_tof(via_tof);
            if let Some(efixed) = efixed {
                conversion = conversion.with_efixed(efixed);
            }
            convert(&from, &to, detector, l1, conversion, &values)?
        }

        Commands::Units => units(),
    };

    print_json(&output, cli.pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bins_reports_edges() {
        let value = bins("0,25,100", false, None, None).unwrap();
        assert_eq!(value["n_bins"], 4);
        assert_eq!(value["edges"][4], 100.0);
    }

    #[test]
    fn test_bare_width_needs_both_bounds() {
        assert!(matches!(
            bins("10", false, Some(0.0), None),
            Err(CliError::InvalidArgument(_))
        ));
        let value = bins("10", false, Some(0.0), Some(30.0)).unwrap();
        assert_eq!(value["n_bins"], 3);
    }

    #[test]
    fn test_dspacing_conversion_matches_forced_route() {
        let detector = DetectorGeometry::new(2.0, 90.0_f64.to_radians());
        let direct = convert(
            "TOF",
            "dSpacing",
            detector,
            10.0,
            ConversionConfig::default(),
            &[1000.0],
        )
        .unwrap();
        let forced = convert(
            "TOF",
            "dSpacing",
            detector,
            10.0,
            ConversionConfig::default().with_force_via_tof(true),
            &[1000.0],
        )
        .unwrap();
        let a = direct["converted"][0].as_f64().unwrap();
        let b = forced["converted"][0].as_f64().unwrap();
        assert_relative_eq!(a, b, max_relative = 1e-9);
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let detector = DetectorGeometry::new(2.0, 1.0);
        assert!(matches!(
            convert(
                "TOF",
                "Furlongs",
                detector,
                10.0,
                ConversionConfig::default(),
                &[1.0]
            ),
            Err(CliError::Core(_))
        ));
    }

    #[test]
    fn test_units_lists_every_unit() {
        let value = units();
        assert_eq!(value.as_array().unwrap().len(), Unit::ALL.len());
    }
}
