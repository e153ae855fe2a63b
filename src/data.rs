//! Reading model inputs from a data directory and writing the cost table.
//!
//! Parsers work on any `BufRead` so they can be fed from files or in-memory buffers.
//! Source data numbers bidder and auction types from 1; everything returned here is 0-based.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use crate::competitors::CumulativeDistribution;
use crate::config::CompetitorSourceKind;
use crate::errors::{EstimationError, Result};
use crate::estimator::BidEstimate;
use crate::tensor::CellTensor;
use crate::types::{AuctionContext, AuctionTraits, Bid, BidRole, BidSelectionParams, Financing};

pub const COEFFICIENT_FILE: &str = "coeff.txt";
pub const BIDDER_TYPE_DIST_FILE: &str = "bidder_type_distribution.csv";
pub const NUM_BID_DIST_FILE: &str = "num_bid_distribution.csv";

/// Fields per line of the bid file
const BID_FIELDS: usize = 11;
/// Fields per line of a sample-pool file
const SAMPLE_BID_FIELDS: usize = 7;
/// Coefficients after the leading `y1` label: indices 0..=7, index 6 unused
const NUM_COEFFICIENTS: usize = 8;

/// Name of the table file for one cell, with 1-based indices as stored on disk
pub fn cell_file_name(source: CompetitorSourceKind, bidder_type: usize, obs_auc_type: usize, unobs_auc_type: usize) -> String {
    format!(
        "{}_btype_{}_oauctype_{}_uauctype_{}.csv",
        source.file_prefix(),
        bidder_type + 1,
        obs_auc_type + 1,
        unobs_auc_type + 1
    )
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| EstimationError::Configuration(format!("cannot open {}: {}", path.display(), e)))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Count consecutive cell files along each axis, holding the other two axes at their first value
pub fn discover_traits(data_dir: &Path, source: CompetitorSourceKind) -> Result<AuctionTraits> {
    let count_along = |cell: &dyn Fn(usize) -> (usize, usize, usize)| {
        let mut count = 0;
        loop {
            let (b, o, u) = cell(count);
            if !data_dir.join(cell_file_name(source, b, o, u)).is_file() {
                return count;
            }
            count += 1;
        }
    };
    let num_bidder_types = count_along(&|i| (i, 0, 0));
    let num_obs_auc_types = count_along(&|i| (0, i, 0));
    let num_unobs_auc_types = count_along(&|i| (0, 0, i));
    AuctionTraits::new(num_bidder_types, num_obs_auc_types, num_unobs_auc_types)
}

fn parse_f64(field: &str, source_name: &str, line: usize, what: &str) -> Result<f64> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| EstimationError::malformed(source_name, line, format!("invalid {} '{}'", what, field.trim())))?;
    if !value.is_finite() {
        return Err(EstimationError::malformed(source_name, line, format!("{} is not finite", what)));
    }
    Ok(value)
}

fn parse_u32(field: &str, source_name: &str, line: usize, what: &str) -> Result<u32> {
    field
        .trim()
        .parse()
        .map_err(|_| EstimationError::malformed(source_name, line, format!("invalid {} '{}'", what, field.trim())))
}

fn parse_flag(field: &str, source_name: &str, line: usize, what: &str) -> Result<bool> {
    match field.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(EstimationError::malformed(source_name, line, format!("{} must be 0 or 1, got '{}'", what, other))),
    }
}

/// Skip the header line, failing on empty input
fn skip_header<R: BufRead>(lines: &mut Lines<R>, source_name: &str) -> Result<()> {
    match lines.next() {
        Some(header) => {
            header?;
            Ok(())
        }
        None => Err(EstimationError::malformed(source_name, 1, "missing header line")),
    }
}

/// Parse the two-row coefficient file: a header, then `y1` followed by the values
pub fn parse_coefficients<R: BufRead>(reader: R, source_name: &str) -> Result<BidSelectionParams> {
    let mut lines = reader.lines();
    skip_header(&mut lines, source_name)?;
    let row = match lines.next() {
        Some(row) => row?,
        None => return Err(EstimationError::malformed(source_name, 2, "missing coefficient row")),
    };
    let mut tokens = row.split_whitespace().peekable();
    if tokens.peek() == Some(&"y1") {
        tokens.next();
    }
    let values = tokens
        .map(|token| parse_f64(token, source_name, 2, "coefficient"))
        .collect::<Result<Vec<f64>>>()?;
    if values.len() < NUM_COEFFICIENTS {
        return Err(EstimationError::malformed(
            source_name,
            2,
            format!("expected at least {} coefficients, found {}", NUM_COEFFICIENTS, values.len()),
        ));
    }
    let params = BidSelectionParams {
        bid_amount_coeff: values[0],
        sell_rep_coeff: values[1],
        lnnumreps_coeff: values[2],
        buyrep_coeff: values[3],
        lnprevcancel_coeff: values[4],
        nest_constant: values[5],
        nest_corr: values[7],
    };
    params.validate()?;
    Ok(params)
}

pub fn load_coefficients(data_dir: &Path) -> Result<BidSelectionParams> {
    let path = data_dir.join(COEFFICIENT_FILE);
    parse_coefficients(open(&path)?, &display_name(&path))
}

/// Parse one inverse-CDF cell: a header, then one amount per row (first field), exactly `grid_size` rows
pub fn parse_quantile_cell<R: BufRead>(reader: R, source_name: &str, grid_size: usize) -> Result<Vec<f64>> {
    let mut lines = reader.lines();
    skip_header(&mut lines, source_name)?;
    let mut quantiles = Vec::with_capacity(grid_size);
    for (index, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let field = line.split(',').next().unwrap_or("");
        quantiles.push(parse_f64(field, source_name, index + 2, "quantile amount")?);
    }
    if quantiles.len() != grid_size {
        return Err(EstimationError::malformed(
            source_name,
            quantiles.len() + 1,
            format!("expected {} quantiles, found {}", grid_size, quantiles.len()),
        ));
    }
    Ok(quantiles)
}

/// Parse one sample-pool cell of exactly `pool_size` recorded bids.
/// Pool bids carry no auction context of their own; it is supplied when they are drawn.
pub fn parse_sample_cell<R: BufRead>(reader: R, source_name: &str, pool_size: usize) -> Result<Vec<Bid>> {
    let mut lines = reader.lines();
    skip_header(&mut lines, source_name)?;
    let mut pool = Vec::with_capacity(pool_size);
    for (index, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 2;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != SAMPLE_BID_FIELDS {
            return Err(EstimationError::malformed(
                source_name,
                line_number,
                format!("expected {} fields, found {}", SAMPLE_BID_FIELDS, fields.len()),
            ));
        }
        let amount = parse_f64(fields[0], source_name, line_number, "amount")?;
        let bidder_type = parse_u32(fields[1], source_name, line_number, "bidder type")? as usize;
        let mut bid = Bid::new(amount, bidder_type.saturating_sub(1), AuctionContext::default());
        bid.financing = Some(Financing {
            loan_offered: parse_flag(fields[2], source_name, line_number, "loan_offered")?,
            us_panel: parse_flag(fields[3], source_name, line_number, "us_panel")?,
            chinese_panel: parse_flag(fields[4], source_name, line_number, "chinese_panel")?,
            loan_rate: parse_f64(fields[5], source_name, line_number, "loan rate")?,
            relative_system_size: parse_f64(fields[6], source_name, line_number, "relative system size")?,
        });
        pool.push(bid);
    }
    if pool.len() != pool_size {
        return Err(EstimationError::malformed(
            source_name,
            pool.len() + 1,
            format!("expected {} sample bids, found {}", pool_size, pool.len()),
        ));
    }
    Ok(pool)
}

fn load_cells<T, F>(data_dir: &Path, source: CompetitorSourceKind, traits: &AuctionTraits, cell_size: usize, parse: F) -> Result<CellTensor<T>>
where
    F: Fn(BufReader<File>, &str, usize) -> Result<Vec<T>>,
{
    CellTensor::from_fn(traits, cell_size, |b, o, u| {
        let path: PathBuf = data_dir.join(cell_file_name(source, b, o, u));
        parse(open(&path)?, &display_name(&path), cell_size)
    })
}

pub fn load_inverse_cdf_table(data_dir: &Path, traits: &AuctionTraits, grid_size: usize) -> Result<CellTensor<f64>> {
    load_cells(data_dir, CompetitorSourceKind::Quantile, traits, grid_size, |r, name, n| parse_quantile_cell(r, name, n))
}

pub fn load_sample_pool(data_dir: &Path, traits: &AuctionTraits, pool_size: usize) -> Result<CellTensor<Bid>> {
    load_cells(data_dir, CompetitorSourceKind::Sample, traits, pool_size, |r, name, n| parse_sample_cell(r, name, n))
}

/// Parse a per-observed-type probability table (no header): one row per observed auction type.
/// `bins` fixes the row width when given; otherwise the first row decides it.
pub fn parse_distribution<R: BufRead>(reader: R, source_name: &str, num_rows: usize, bins: Option<usize>) -> Result<Vec<CumulativeDistribution>> {
    let mut rows = Vec::with_capacity(num_rows);
    let mut width = bins;
    for (index, line) in reader.lines().enumerate() {
        if rows.len() == num_rows {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;
        let probabilities = line
            .split(',')
            .map(|field| parse_f64(field, source_name, line_number, "probability"))
            .collect::<Result<Vec<f64>>>()?;
        let expected = *width.get_or_insert(probabilities.len());
        if probabilities.len() != expected {
            return Err(EstimationError::malformed(
                source_name,
                line_number,
                format!("expected {} probabilities, found {}", expected, probabilities.len()),
            ));
        }
        let distribution = CumulativeDistribution::from_probabilities(&probabilities)
            .map_err(|e| EstimationError::malformed(source_name, line_number, e.to_string()))?;
        rows.push(distribution);
    }
    if rows.len() != num_rows {
        return Err(EstimationError::malformed(
            source_name,
            rows.len() + 1,
            format!("expected {} rows, found {}", num_rows, rows.len()),
        ));
    }
    Ok(rows)
}

pub fn load_bidder_type_distribution(data_dir: &Path, traits: &AuctionTraits) -> Result<Vec<CumulativeDistribution>> {
    let path = data_dir.join(BIDDER_TYPE_DIST_FILE);
    parse_distribution(open(&path)?, &display_name(&path), traits.num_obs_auc_types, Some(traits.num_bidder_types))
}

pub fn load_num_bid_distribution(data_dir: &Path, traits: &AuctionTraits) -> Result<Vec<CumulativeDistribution>> {
    let path = data_dir.join(NUM_BID_DIST_FILE);
    parse_distribution(open(&path)?, &display_name(&path), traits.num_obs_auc_types, None)
}

/// Parse one line of the bid file
pub fn parse_bid_line(line: &str, source_name: &str, line_number: usize) -> Result<Bid> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != BID_FIELDS {
        return Err(EstimationError::malformed(
            source_name,
            line_number,
            format!("expected {} fields, found {}", BID_FIELDS, fields.len()),
        ));
    }
    let raw_bidder_type = parse_u32(fields[1], source_name, line_number, "bidder type")? as usize;
    let raw_obs_auc_type = parse_u32(fields[2], source_name, line_number, "observed auction type")? as usize;
    if raw_obs_auc_type == 0 {
        return Err(EstimationError::malformed(source_name, line_number, "observed auction type starts at 1"));
    }
    let amount = parse_f64(fields[3], source_name, line_number, "amount")?;
    let context = AuctionContext {
        obs_auc_type: raw_obs_auc_type - 1,
        sum_rep: parse_u32(fields[6], source_name, line_number, "sum_rep")?,
        num_reps: parse_u32(fields[7], source_name, line_number, "num_reps")?,
        previous_auctions: parse_u32(fields[8], source_name, line_number, "previous_auctions")?,
        previous_cancels: parse_u32(fields[9], source_name, line_number, "previous_cancels")?,
    };
    let mut bid = Bid::new(amount, raw_bidder_type.saturating_sub(1), context);
    bid.role = if raw_bidder_type == 0 {
        BidRole::OutsideOption
    } else if amount == 0.0 {
        BidRole::Placeholder
    } else {
        BidRole::Participating
    };
    Ok(bid)
}

/// Streams focal bids from a bid file; the iterator ends with the input
pub struct BidReader<R: BufRead> {
    lines: Lines<R>,
    source_name: String,
    line_number: usize,
}

impl<R: BufRead> BidReader<R> {
    /// Wrap a reader positioned at the header line
    pub fn new(reader: R, source_name: &str) -> Result<Self> {
        let mut lines = reader.lines();
        skip_header(&mut lines, source_name)?;
        Ok(Self {
            lines,
            source_name: source_name.to_string(),
            line_number: 1,
        })
    }
}

impl BidReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(open(path)?, &display_name(path))
    }
}

impl<R: BufRead> Iterator for BidReader<R> {
    type Item = Result<Bid>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_number += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_bid_line(&line, &self.source_name, self.line_number));
        }
    }
}

/// Writes one row per bid: `p_1, d_1, c_1, p_2, d_2, c_2, ...`
pub struct CostTableWriter<W: Write> {
    writer: W,
    rows: usize,
}

impl<W: Write> CostTableWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0 }
    }

    pub fn write_row(&mut self, estimate: &BidEstimate) -> Result<()> {
        let fields: Vec<String> = estimate
            .per_unobs_type
            .iter()
            .flat_map(|cost| [cost.mean_probability, cost.mean_derivative, cost.implied_cost])
            .map(|value| format!("{}", value))
            .collect();
        writeln!(self.writer, "{}", fields.join(", "))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl CostTableWriter<std::io::BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(std::io::BufWriter::new(File::create(path)?)))
    }
}
