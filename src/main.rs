mod charts;
mod competitors;
mod config;
mod data;
mod errors;
mod estimator;
mod logger;
mod scenarios;
mod simulator;
mod tensor;
mod types;
mod utility;
mod utils;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use competitors::{CompetitorModel, CompetitorSource, InverseCdfTable, SampleBidPool};
use config::{CompetitorSourceKind, RunConfig};
use data::{BidReader, CostTableWriter};
use errors::EstimationError;
use estimator::{BidEstimate, CostEstimator, EstimationSummary};
use logger::{Logger, LogEvent, ConsoleReceiver, FileReceiver, sanitize_filename};
use scenarios::get_scenario_catalog;
use types::{AuctionContext, Bid, BidRole};
use utils::RAND_SEED;

const USAGE: &str = "Usage:
  beauty_contest estimate <data_dir> [--bids FILE] [--output FILE] [--source quantile|sample]
                          [--sims N] [--competitors N] [--commission K] [--seed S]
                          [--bidder-type-dist] [--num-bid-dist] [--sequential]
                          [--skip-malformed] [--charts] [--verbose draws]
  beauty_contest scenario <name|all> [iterations] [start_iteration] [--fastbreak]";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("estimate") => {
            let config = match RunConfig::from_args(&args[2..]) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!("{}", USAGE);
                    std::process::exit(1);
                }
            };
            let mut logger = Logger::new();
            logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Estimation]));
            match FileReceiver::new(&PathBuf::from("log/estimation.log"), vec![LogEvent::Bid, LogEvent::Estimation]) {
                Ok(receiver) => {
                    logger.add_receiver(receiver);
                }
                Err(e) => eprintln!("Warning: cannot open log/estimation.log: {}", e),
            }
            if config.verbose_draws {
                match FileReceiver::new(&PathBuf::from("log/draws.csv"), vec![LogEvent::Draw]) {
                    Ok(receiver) => {
                        logger.add_receiver(receiver);
                    }
                    Err(e) => eprintln!("Warning: cannot open log/draws.csv: {}", e),
                }
            }
            let outcome = run_estimation(&config, &mut logger);
            let _ = logger.flush();
            if let Err(e) = outcome {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Some("scenario") => {
            if let Err(e) = run_scenarios(&args[2..]) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

/// Stand-in for a bid line that could not be parsed; estimates to the sentinel row
fn placeholder_bid() -> Bid {
    Bid {
        role: BidRole::Placeholder,
        ..Bid::new(0.0, 0, AuctionContext::default())
    }
}

/// Read every focal bid; malformed lines abort unless `skip_malformed` is set
fn read_bids(config: &RunConfig, logger: &mut Logger) -> Result<Vec<Bid>, EstimationError> {
    let mut bids = Vec::new();
    for record in BidReader::open(&config.bids_path)? {
        match record {
            Ok(bid) => bids.push(bid),
            Err(e @ EstimationError::MalformedRecord { .. }) if config.skip_malformed => {
                warnln!(logger, LogEvent::Bid, "skipping row {}: {}", bids.len() + 1, e);
                bids.push(placeholder_bid());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(bids)
}

fn load_model(config: &RunConfig, logger: &mut Logger) -> Result<CompetitorModel, EstimationError> {
    let traits = data::discover_traits(&config.data_dir, config.source)?;
    logln!(logger, LogEvent::Estimation, "Number of bidder types: {}", traits.num_bidder_types);
    logln!(logger, LogEvent::Estimation, "Number of observed auction types: {}", traits.num_obs_auc_types);
    logln!(logger, LogEvent::Estimation, "Number of unobserved auction types: {}", traits.num_unobs_auc_types);

    let source: Box<dyn CompetitorSource> = match config.source {
        CompetitorSourceKind::Quantile => {
            let table = data::load_inverse_cdf_table(&config.data_dir, &traits, utils::QUANTILE_GRID_SIZE)?;
            logln!(logger, LogEvent::Estimation, "Inverse-CDF cells {:?}, {} quantiles each", table.dims(), table.cell_size());
            Box::new(InverseCdfTable::new(table))
        }
        CompetitorSourceKind::Sample => {
            let pool = data::load_sample_pool(&config.data_dir, &traits, utils::SAMPLE_POOL_SIZE)?;
            logln!(logger, LogEvent::Estimation, "Sample pool cells {:?}, {} bids each", pool.dims(), pool.cell_size());
            Box::new(SampleBidPool::new(pool))
        }
    };
    let mut model = CompetitorModel::new(traits, source)?.with_num_competitors(config.num_competitors);
    if config.use_bidder_type_dist {
        model = model.with_bidder_type_distribution(data::load_bidder_type_distribution(&config.data_dir, &traits)?)?;
        logln!(logger, LogEvent::Estimation, "Bidder types drawn from {}", data::BIDDER_TYPE_DIST_FILE);
    }
    if config.use_num_bid_dist {
        model = model.with_num_bid_distribution(data::load_num_bid_distribution(&config.data_dir, &traits)?)?;
        logln!(logger, LogEvent::Estimation, "Competitor counts drawn from {}", data::NUM_BID_DIST_FILE);
    }
    logln!(logger, LogEvent::Estimation, "Loaded {} competitor tables", model.source_name());
    Ok(model)
}

/// Load inputs, estimate every bid and write the cost table
fn run_estimation(config: &RunConfig, logger: &mut Logger) -> Result<EstimationSummary, Box<dyn Error>> {
    let model = load_model(config, logger)?;
    let params = data::load_coefficients(&config.data_dir)?;
    logln!(logger, LogEvent::Estimation, "{:?}", params);
    let estimator = CostEstimator::new(&model, &params, config.estimator_config())?;

    let bids = read_bids(config, logger)?;
    logln!(logger, LogEvent::Estimation, "Estimating {} bids with {} simulations each ({})",
        bids.len(), config.num_simulations, if config.sequential { "sequential" } else { "parallel" });

    let results: Vec<errors::Result<BidEstimate>> = if config.verbose_draws {
        logln!(logger, LogEvent::Draw, "bid,unobs_auc_type,draw,probability,derivative,competitors");
        bids.iter()
            .enumerate()
            .map(|(index, bid)| {
                let mut rng = utils::task_rng(config.base_seed, index);
                estimator.estimate_bid_with(bid, &mut rng, &mut |unobs_auc_type, draw, auction| {
                    logln!(logger, LogEvent::Draw, "{},{}", index, auction.csv_row(unobs_auc_type, draw));
                })
            })
            .collect()
    } else if config.sequential {
        estimator.estimate_all_sequential(&bids)
    } else {
        estimator.estimate_all(&bids)
    };

    // Only per-record failures may end up as sentinel rows
    if let Some(Err(fatal)) = results.iter().find(|r| matches!(r, Err(e) if !e.is_per_record())) {
        return Err(format!("estimation aborted: {}", fatal).into());
    }

    let num_unobs_auc_types = estimator.num_unobs_auc_types();
    let mut writer = CostTableWriter::create(&config.output_path)?;
    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(estimate) => {
                if !estimate.is_sentinel() && logger.is_enabled(LogEvent::Bid) {
                    let costs: Vec<String> = estimate.per_unobs_type.iter().map(|c| format!("{:.4}", c.implied_cost)).collect();
                    logln!(logger, LogEvent::Bid, "bid {}: amount {:.4}, costs [{}]", index + 1, bids[index].amount, costs.join(", "));
                }
                writer.write_row(estimate)?;
            }
            Err(e) => {
                errln!(logger, LogEvent::Bid, "bid {}: {}", index + 1, e);
                writer.write_row(&BidEstimate::sentinel(num_unobs_auc_types))?;
            }
        }
    }
    let rows = writer.rows();
    writer.finish()?;

    let summary = EstimationSummary::new(&results, num_unobs_auc_types);
    logln!(logger, LogEvent::Estimation, "Wrote {} rows to {}", rows, config.output_path.display());
    logln!(logger, LogEvent::Estimation, "Simulated: {}, sentinel: {}, failed: {}",
        summary.simulated_bids, summary.sentinel_bids, summary.failed_bids);
    for (unobs_auc_type, mean_cost) in summary.mean_implied_cost.iter().enumerate() {
        logln!(logger, LogEvent::Estimation, "Mean implied cost, unobserved auction type {}: {:.4}", unobs_auc_type + 1, mean_cost);
    }

    if config.charts {
        charts::generate_cost_histograms(&results, num_unobs_auc_types, Path::new("charts"), logger)?;
    }
    Ok(summary)
}

/// `scenario <name|all> [iterations] [start_iteration] [--fastbreak]`
fn run_scenarios(raw_args: &[String]) -> Result<(), Box<dyn Error>> {
    let fastbreak = raw_args.iter().any(|arg| arg == "--fastbreak");
    let args: Vec<&String> = raw_args.iter().filter(|arg| *arg != "--fastbreak").collect();

    let scenario_arg = args.first().ok_or("missing scenario name")?.as_str();
    let iterations = match args.get(1) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| format!("Invalid iterations parameter '{}'. Expected a number.", value))?,
        None => 1,
    };
    let start_iteration = match args.get(2) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| format!("Invalid start iteration parameter '{}'. Expected a number.", value))?,
        None => 0,
    };

    let all_scenarios = get_scenario_catalog();
    let scenarios: Vec<_> = if scenario_arg == "all" {
        all_scenarios.clone()
    } else {
        match all_scenarios.iter().find(|s| s.short_name == scenario_arg) {
            Some(scenario) => vec![scenario.clone()],
            None => {
                let names: Vec<&str> = all_scenarios.iter().map(|s| s.short_name).collect();
                return Err(format!("Scenario '{}' not found. Available scenarios: {}", scenario_arg, names.join(", ")).into());
            }
        }
    };

    // Single scenario, single iteration: also show the individual validations
    let mut logger = Logger::new();
    if scenario_arg != "all" && iterations == 1 {
        logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Validation, LogEvent::Scenario]));
    } else {
        logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Validation]));
    }
    let summary_receiver_id = logger.add_receiver(FileReceiver::new(&PathBuf::from("log/summary.log"), vec![LogEvent::Validation])?);

    if iterations > 1 {
        logln!(&mut logger, LogEvent::Validation, "Running '{}' {} times...\n", scenario_arg, iterations);
    } else {
        logln!(&mut logger, LogEvent::Validation, "Running '{}'...\n", scenario_arg);
    }

    let mut failures = 0;
    'scenarios: for scenario in &scenarios {
        log!(&mut logger, LogEvent::Validation, "{}: ", scenario.short_name);
        let scenario_receiver_id = logger.add_receiver(FileReceiver::new(
            &PathBuf::from(format!("log/{}/scenario.log", sanitize_filename(scenario.short_name))),
            vec![LogEvent::Scenario],
        )?);

        for i in start_iteration..(start_iteration + iterations) {
            if iterations > 1 {
                log!(&mut logger, LogEvent::Validation, "[{}/{}] ", i - start_iteration + 1, iterations);
            }
            RAND_SEED.store(i, Ordering::Relaxed);

            match (scenario.run)(scenario.short_name, &mut logger) {
                Ok(()) => {
                    if iterations > 1 {
                        logln!(&mut logger, LogEvent::Validation, "✓");
                    } else {
                        logln!(&mut logger, LogEvent::Validation, "✓ PASSED");
                    }
                }
                Err(e) => {
                    failures += 1;
                    if iterations > 1 {
                        logln!(&mut logger, LogEvent::Validation, "✗");
                    } else {
                        logln!(&mut logger, LogEvent::Validation, "✗ FAILED: {}", e);
                    }
                    if fastbreak {
                        logger.remove_receiver(scenario_receiver_id);
                        logln!(&mut logger, LogEvent::Validation, "\nStopping scenario execution due to failure (--fastbreak enabled)");
                        logln!(&mut logger, LogEvent::Validation, "Error at iteration {} (seed {}): {}", i - start_iteration + 1, i, e);
                        break 'scenarios;
                    }
                }
            }
            let _ = logger.flush();
        }
        logger.remove_receiver(scenario_receiver_id);
    }

    logger.remove_receiver(summary_receiver_id);
    if failures > 0 {
        return Err(format!("{} scenario run(s) failed", failures).into());
    }
    Ok(())
}
