use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use crate::errors::Result as EstimationResult;
use crate::estimator::BidEstimate;
use crate::logger::{LogEvent, Logger};
use crate::logln;

const NUM_BINS: usize = 50;

const SERIES_COLORS: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

/// Histogram bins of `values`: returns the lower edge, the bin width and the counts
pub fn bin_counts(values: &[f64], num_bins: usize) -> (f64, f64, Vec<u32>) {
    let min_val = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // All values equal: a unit-wide range keeps the chart drawable
    let bin_width = if max_val > min_val { (max_val - min_val) / num_bins as f64 } else { 1.0 / num_bins as f64 };

    let mut bins = vec![0u32; num_bins];
    for &value in values {
        let bin_idx = ((value - min_val) / bin_width).floor() as usize;
        bins[bin_idx.min(num_bins - 1)] += 1;
    }
    (min_val, bin_width, bins)
}

/// Implied costs of every simulated bid, one vector per unobserved auction type
pub fn implied_costs_by_type(results: &[EstimationResult<BidEstimate>], num_unobs_auc_types: usize) -> Vec<Vec<f64>> {
    let mut costs = vec![Vec::new(); num_unobs_auc_types];
    for estimate in results.iter().flatten().filter(|estimate| !estimate.is_sentinel()) {
        for (series, cost) in costs.iter_mut().zip(&estimate.per_unobs_type) {
            series.push(cost.implied_cost);
        }
    }
    costs
}

/// Write one implied-cost histogram per unobserved auction type into `dir`
pub fn generate_cost_histograms(
    results: &[EstimationResult<BidEstimate>],
    num_unobs_auc_types: usize,
    dir: &Path,
    logger: &mut Logger,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (unobs_auc_type, costs) in implied_costs_by_type(results, num_unobs_auc_types).iter().enumerate() {
        if costs.is_empty() {
            logln!(logger, LogEvent::Estimation, "No implied costs for unobserved auction type {}, skipping chart", unobs_auc_type + 1);
            continue;
        }
        let path = dir.join(format!("implied_cost_uauctype_{}.png", unobs_auc_type + 1));
        create_single_histogram(
            costs,
            &format!("Implied Cost, Unobserved Auction Type {}", unobs_auc_type + 1),
            &path,
            "Implied cost",
            &SERIES_COLORS[unobs_auc_type % SERIES_COLORS.len()],
        )?;
        let mean_val = costs.iter().sum::<f64>() / costs.len() as f64;
        logln!(logger, LogEvent::Estimation, "Histogram saved to {} (n={}, mean {:.2})", path.display(), costs.len(), mean_val);
        written.push(path);
    }
    Ok(written)
}

fn create_single_histogram(
    values: &[f64],
    title: &str,
    filename: &Path,
    x_label: &str,
    color: &RGBColor,
) -> Result<(), Box<dyn std::error::Error>> {
    if values.is_empty() {
        return Err("Cannot create histogram: dataset is empty".into());
    }

    let (min_val, bin_width, bins) = bin_counts(values, NUM_BINS);
    let max_val = min_val + bin_width * NUM_BINS as f64;
    let mean_val = values.iter().sum::<f64>() / values.len() as f64;
    let max_count = *bins.iter().max().unwrap_or(&0);

    let root = BitMapBackend::new(filename, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(min_val..max_val, 0u32..max_count + max_count / 10 + 1)?;

    chart.configure_mesh()
        .x_desc(x_label)
        .y_desc("Count")
        .draw()?;

    chart.draw_series(
        bins.iter().enumerate().map(|(i, &count)| {
            let x0 = min_val + i as f64 * bin_width;
            let x1 = x0 + bin_width;
            Rectangle::new([(x0, 0), (x1, count)], color.filled())
        })
    )?
    .label(format!("Bids (n={})", values.len()))
    .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(mean_val, 0), (mean_val, max_count)],
        &BLACK,
    )))?
    .label(format!("Mean: {:.2}", mean_val))
    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLACK));

    chart.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
