use std::path::PathBuf;
use crate::errors::{EstimationError, Result};
use crate::estimator::EstimatorConfig;
use crate::utils::{DEFAULT_BASE_SEED, DEFAULT_COMMISSION_FACTOR, DEFAULT_NUM_COMPETITORS, DEFAULT_NUM_SIMULATIONS};

/// Bid file looked up inside the data directory when `--bids` is not given
pub const DEFAULT_BIDS_FILE: &str = "bids.csv";

pub const DEFAULT_OUTPUT_FILE: &str = "costs.csv";

/// Which empirical table competitors are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitorSourceKind {
    /// `inv_cdf_*` quantile grids
    Quantile,
    /// `sample_bids_*` recorded bid pools
    Sample,
}

impl CompetitorSourceKind {
    /// File name prefix of the per-cell tables
    pub fn file_prefix(&self) -> &'static str {
        match self {
            CompetitorSourceKind::Quantile => "inv_cdf",
            CompetitorSourceKind::Sample => "sample_bids",
        }
    }
}

/// Settings of one `estimate` run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub bids_path: PathBuf,
    pub output_path: PathBuf,
    pub source: CompetitorSourceKind,
    pub num_simulations: usize,
    pub num_competitors: usize,
    pub commission_factor: f64,
    pub base_seed: u64,
    pub use_bidder_type_dist: bool,
    pub use_num_bid_dist: bool,
    pub sequential: bool,
    pub skip_malformed: bool,
    pub charts: bool,
    /// Log every simulated auction; forces the sequential path
    pub verbose_draws: bool,
}

impl RunConfig {
    /// Defaults for a data directory
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            bids_path: data_dir.join(DEFAULT_BIDS_FILE),
            data_dir,
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            source: CompetitorSourceKind::Quantile,
            num_simulations: DEFAULT_NUM_SIMULATIONS,
            num_competitors: DEFAULT_NUM_COMPETITORS,
            commission_factor: DEFAULT_COMMISSION_FACTOR,
            base_seed: DEFAULT_BASE_SEED,
            use_bidder_type_dist: false,
            use_num_bid_dist: false,
            sequential: false,
            skip_malformed: false,
            charts: false,
            verbose_draws: false,
        }
    }

    /// Parse the arguments following the `estimate` subcommand
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut data_dir: Option<PathBuf> = None;
        let mut bids_path: Option<PathBuf> = None;
        let mut output_path: Option<PathBuf> = None;
        let mut config = RunConfig::new(PathBuf::new());

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "--bids" => bids_path = Some(PathBuf::from(flag_value(args, i)?)),
                "--output" => output_path = Some(PathBuf::from(flag_value(args, i)?)),
                "--source" => {
                    config.source = match flag_value(args, i)? {
                        "quantile" => CompetitorSourceKind::Quantile,
                        "sample" => CompetitorSourceKind::Sample,
                        other => {
                            return Err(EstimationError::Configuration(format!(
                                "unknown competitor source '{}', expected 'quantile' or 'sample'",
                                other
                            )))
                        }
                    }
                }
                "--sims" => config.num_simulations = parse_flag(args, i)?,
                "--competitors" => config.num_competitors = parse_flag(args, i)?,
                "--commission" => config.commission_factor = parse_flag(args, i)?,
                "--seed" => config.base_seed = parse_flag(args, i)?,
                "--verbose" => {
                    if flag_value(args, i)? != "draws" {
                        return Err(EstimationError::Configuration(format!(
                            "unknown verbosity '{}', expected 'draws'",
                            args[i + 1]
                        )));
                    }
                    config.verbose_draws = true;
                }
                "--bidder-type-dist" => config.use_bidder_type_dist = true,
                "--num-bid-dist" => config.use_num_bid_dist = true,
                "--sequential" => config.sequential = true,
                "--skip-malformed" => config.skip_malformed = true,
                "--charts" => config.charts = true,
                _ if arg.starts_with("--") => {
                    return Err(EstimationError::Configuration(format!("unknown option '{}'", arg)));
                }
                _ => {
                    if data_dir.is_some() {
                        return Err(EstimationError::Configuration(format!("unexpected argument '{}'", arg)));
                    }
                    data_dir = Some(PathBuf::from(arg));
                }
            }
            // Flags with a value consume the following argument too
            i += if takes_value(arg) { 2 } else { 1 };
        }

        let data_dir = data_dir.ok_or_else(|| EstimationError::Configuration("missing data directory".to_string()))?;
        config.bids_path = bids_path.unwrap_or_else(|| data_dir.join(DEFAULT_BIDS_FILE));
        config.output_path = output_path.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE));
        config.data_dir = data_dir;
        if config.verbose_draws {
            config.sequential = true;
        }
        config.estimator_config().validate()?;
        Ok(config)
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            num_simulations: self.num_simulations,
            commission_factor: self.commission_factor,
            base_seed: self.base_seed,
        }
    }
}

fn takes_value(flag: &str) -> bool {
    matches!(
        flag,
        "--bids" | "--output" | "--source" | "--sims" | "--competitors" | "--commission" | "--seed" | "--verbose"
    )
}

fn flag_value(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| EstimationError::Configuration(format!("{} expects a value", args[i])))
}

fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize) -> Result<T> {
    let value = flag_value(args, i)?;
    value
        .parse::<T>()
        .map_err(|_| EstimationError::Configuration(format!("invalid value '{}' for {}", value, args[i])))
}
