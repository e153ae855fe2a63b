use crate::errors::{EstimationError, Result};
use crate::types::AuctionTraits;

/// Rectangular table of `bidder types × observed auction types × unobserved auction types × cell_size`.
///
/// Built once after trait discovery and read-only afterwards. Cells are stored contiguously
/// in bidder-type-major order.
#[derive(Debug, Clone)]
pub struct CellTensor<T> {
    dims: [usize; 3],
    cell_size: usize,
    data: Vec<T>,
}

impl<T> CellTensor<T> {
    /// Fill the tensor by calling `load_cell` once per cell.
    /// Every returned cell must hold exactly `cell_size` entries.
    pub fn from_fn<F>(traits: &AuctionTraits, cell_size: usize, mut load_cell: F) -> Result<Self>
    where
        F: FnMut(usize, usize, usize) -> Result<Vec<T>>,
    {
        if cell_size == 0 {
            return Err(EstimationError::Configuration("empty table cells".to_string()));
        }
        let dims = [traits.num_bidder_types, traits.num_obs_auc_types, traits.num_unobs_auc_types];
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2] * cell_size);
        for bidder_type in 0..dims[0] {
            for obs_auc_type in 0..dims[1] {
                for unobs_auc_type in 0..dims[2] {
                    let cell = load_cell(bidder_type, obs_auc_type, unobs_auc_type)?;
                    if cell.len() != cell_size {
                        return Err(EstimationError::Configuration(format!(
                            "cell ({}, {}, {}) holds {} entries, expected {}",
                            bidder_type, obs_auc_type, unobs_auc_type, cell.len(), cell_size
                        )));
                    }
                    data.extend(cell);
                }
            }
        }
        Ok(Self { dims, cell_size, data })
    }

    /// Entries of one `(bidder_type, obs_auc_type, unobs_auc_type)` cell
    pub fn cell(&self, bidder_type: usize, obs_auc_type: usize, unobs_auc_type: usize) -> Result<&[T]> {
        if bidder_type >= self.dims[0] || obs_auc_type >= self.dims[1] || unobs_auc_type >= self.dims[2] {
            return Err(EstimationError::CellOutOfRange {
                bidder_type,
                obs_auc_type,
                unobs_auc_type,
                dims: self.dims,
            });
        }
        let index = (bidder_type * self.dims[1] + obs_auc_type) * self.dims[2] + unobs_auc_type;
        let start = index * self.cell_size;
        Ok(&self.data[start..start + self.cell_size])
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Whether the tensor was built for exactly these cardinalities
    pub fn matches(&self, traits: &AuctionTraits) -> bool {
        self.dims == [traits.num_bidder_types, traits.num_obs_auc_types, traits.num_unobs_auc_types]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traits() -> AuctionTraits {
        AuctionTraits::new(2, 3, 2).unwrap()
    }

    #[test]
    fn test_cell_layout() {
        let tensor = CellTensor::from_fn(&traits(), 4, |b, o, u| {
            Ok((0..4).map(|q| (b * 1000 + o * 100 + u * 10 + q) as f64).collect())
        })
        .unwrap();
        assert_eq!(tensor.dims(), [2, 3, 2]);
        assert_eq!(tensor.cell(1, 2, 1).unwrap(), &[1210.0, 1211.0, 1212.0, 1213.0]);
        assert_eq!(tensor.cell(0, 1, 0).unwrap()[2], 102.0);
        assert!(tensor.matches(&traits()));
    }

    #[test]
    fn test_observed_and_unobserved_axes_distinct() {
        let square = AuctionTraits::new(1, 3, 3).unwrap();
        let tensor = CellTensor::from_fn(&square, 1, |_, o, u| Ok(vec![(o * 10 + u) as f64])).unwrap();
        assert_eq!(tensor.cell(0, 2, 1).unwrap(), &[21.0]);
        assert_eq!(tensor.cell(0, 1, 2).unwrap(), &[12.0]);
        assert_ne!(tensor.cell(0, 2, 1).unwrap(), tensor.cell(0, 1, 2).unwrap());
    }

    #[test]
    fn test_out_of_range_fails() {
        let tensor = CellTensor::from_fn(&traits(), 1, |_, _, _| Ok(vec![0.0])).unwrap();
        assert!(matches!(tensor.cell(2, 0, 0), Err(EstimationError::CellOutOfRange { .. })));
        assert!(matches!(tensor.cell(0, 3, 0), Err(EstimationError::CellOutOfRange { .. })));
        assert!(matches!(tensor.cell(0, 0, 2), Err(EstimationError::CellOutOfRange { .. })));
    }

    #[test]
    fn test_ragged_cell_rejected() {
        let result = CellTensor::from_fn(&traits(), 3, |b, _, _| Ok(vec![0.0; if b == 1 { 2 } else { 3 }]));
        assert!(matches!(result, Err(EstimationError::Configuration(_))));
    }
}
