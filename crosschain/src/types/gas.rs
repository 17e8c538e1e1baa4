//! Gas price observations

use serde::{Deserialize, Serialize};

/// Latest gas price posted by each observer for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GasPrice {
    pub chain_id: i64,
    pub signers: Vec<String>,
    pub prices: Vec<u128>,
    pub block_nums: Vec<u64>,
    /// Position in `prices` of the median value
    pub median_index: usize,
}

impl GasPrice {
    /// Records or replaces `signer`'s observation and recomputes the median.
    pub fn upsert(&mut self, signer: &str, price: u128, block_num: u64) {
        match self.signers.iter().position(|s| s == signer) {
            Some(i) => {
                self.prices[i] = price;
                self.block_nums[i] = block_num;
            }
            None => {
                self.signers.push(signer.to_string());
                self.prices.push(price);
                self.block_nums.push(block_num);
            }
        }
        self.median_index = self.compute_median_index();
    }

    fn compute_median_index(&self) -> usize {
        let mut order: Vec<usize> = (0..self.prices.len()).collect();
        // ties broken by signer so every replica picks the same entry
        order.sort_by(|&a, &b| {
            self.prices[a]
                .cmp(&self.prices[b])
                .then_with(|| self.signers[a].cmp(&self.signers[b]))
        });
        order.get(order.len() / 2).copied().unwrap_or(0)
    }

    /// Median of the posted prices, if any were posted.
    pub fn median(&self) -> Option<u128> {
        self.prices.get(self.median_index).copied()
    }
}
