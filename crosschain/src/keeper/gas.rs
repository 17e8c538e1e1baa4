//! Gas Price Escalator
//!
//! Periodically raises the gas price of stalled outbounds. Every increase is
//! paid for by the chain's gas stability pool, and a CCTX is bumped at most
//! once per retry interval.

use tracing::{debug, info, warn};

use super::{BlockContext, Keeper};
use crate::error::{CrosschainError, Result};
use crate::msg::MsgGasPriceVoter;
use crate::types::{CrosschainFlags, Event, GasPrice, GasPriceIncreaseFlags};

/// Outcome of one escalation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPriceIncrease {
    pub gas_price_increase: u128,
    pub additional_fees: u128,
}

impl Keeper {
    // ========================================================================
    // MEDIAN GAS PRICE
    // ========================================================================

    /// Records an observer's gas price for a chain.
    pub fn gas_price_voter(&mut self, msg: &MsgGasPriceVoter) -> Result<()> {
        if !self.is_authorized_observer(&msg.creator, msg.chain_id) {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        let mut gas_price = self
            .store()
            .get_gas_price(msg.chain_id)
            .cloned()
            .unwrap_or_else(|| GasPrice {
                chain_id: msg.chain_id,
                ..Default::default()
            });
        gas_price.upsert(&msg.creator, msg.price, msg.block_number);
        debug!(
            "Gas price for chain {} from {}: {} (median {:?})",
            msg.chain_id,
            msg.creator,
            msg.price,
            gas_price.median()
        );
        self.store_mut().set_gas_price(gas_price);
        Ok(())
    }

    /// Median of the observers' posted gas prices.
    ///
    /// # Returns
    ///
    /// * `Ok(u128)` - Median gas price
    /// * `Err(CrosschainError::UnableToGetGasPrice)` - No price posted for the chain
    pub fn median_gas_price(&self, chain_id: i64) -> Result<u128> {
        self.store()
            .get_gas_price(chain_id)
            .and_then(|g| g.median())
            .ok_or(CrosschainError::UnableToGetGasPrice(chain_id))
    }

    // ========================================================================
    // GAS STABILITY POOL
    // ========================================================================

    pub fn fund_gas_stability_pool(&mut self, chain_id: i64, amount: u128) -> Result<()> {
        let balance = self.store().gas_stability_pool_balance(chain_id);
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| CrosschainError::GasPriceOverflow("gas stability pool balance".to_string()))?;
        self.store_mut().set_gas_stability_pool_balance(chain_id, updated);
        Ok(())
    }

    /// Withdraws `amount` from the chain's pool.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Withdrawn
    /// * `Err(CrosschainError::NotEnoughFunds)` - Balance below `amount`
    pub fn withdraw_from_gas_stability_pool(&mut self, chain_id: i64, amount: u128) -> Result<()> {
        let available = self.store().gas_stability_pool_balance(chain_id);
        if available < amount {
            return Err(CrosschainError::NotEnoughFunds {
                chain_id,
                required: amount,
                available,
            });
        }
        self.store_mut()
            .set_gas_stability_pool_balance(chain_id, available - amount);
        Ok(())
    }

    // ========================================================================
    // ESCALATION SWEEP
    // ========================================================================

    /// Runs the escalation sweep when the block height hits an epoch boundary.
    ///
    /// Chains are visited in ascending chain id order and pending CCTXs in
    /// nonce order. A failure for one CCTX is logged and the sweep continues.
    /// Flags without increase settings fall back to the default settings.
    ///
    /// # Returns
    ///
    /// Number of CCTXs whose gas price was raised
    pub fn iterate_and_update_cctx_gas_price(&mut self, ctx: &BlockContext, flags: &CrosschainFlags) -> usize {
        let increase_flags = flags.gas_price_increase_flags.clone().unwrap_or_default();
        if increase_flags.epoch_length <= 0 || ctx.height % increase_flags.epoch_length != 0 {
            return 0;
        }

        let mut updated = 0;
        for chain in self.store().supported_chains() {
            let pending = self.pending_cctx_indexes(chain.chain_id, increase_flags.max_pending_cctxs as usize);
            for index in pending {
                let result = self.with_cache(|k| k.check_and_update_cctx_gas_price(ctx, &index, &increase_flags));
                match result {
                    Ok(Some(increase)) => {
                        updated += 1;
                        info!(
                            "CCTX {}: gas price raised by {}, {} withdrawn from stability pool",
                            index, increase.gas_price_increase, increase.additional_fees
                        );
                    }
                    Ok(None) => {}
                    Err(e @ CrosschainError::NotEnoughFunds { .. }) => {
                        warn!("CCTX {}: gas price not raised this epoch: {}", index, e);
                    }
                    Err(e) => {
                        warn!("CCTX {}: gas price update failed: {}", index, e);
                    }
                }
            }
        }
        updated
    }

    /// Raises the gas price of one pending CCTX if it is due.
    ///
    /// 1. Skip when the current outbound has no gas price or gas limit yet
    /// 2. Skip when `now < last_update + retry_interval`
    /// 3. `increase = median * percent / 100`
    /// 4. Withdraw `gas_limit * increase` from the stability pool
    /// 5. Add `increase` to the gas price and stamp `last_update = now`
    ///
    /// # Returns
    ///
    /// * `Ok(Some(GasPriceIncrease))` - Gas price raised
    /// * `Ok(None)` - Not due or not ready
    /// * `Err(CrosschainError::UnableToGetGasPrice)` - No median price for the chain
    /// * `Err(CrosschainError::NotEnoughFunds)` - Pool cannot cover the increase
    pub fn check_and_update_cctx_gas_price(
        &mut self,
        ctx: &BlockContext,
        index: &str,
        flags: &GasPriceIncreaseFlags,
    ) -> Result<Option<GasPriceIncrease>> {
        let mut cctx = self
            .store()
            .get_cctx(index)
            .cloned()
            .ok_or_else(|| CrosschainError::CctxNotFound(index.to_string()))?;
        let outbound = cctx.current_outbound_or_default();
        let chain_id = outbound.receiver_chain_id;
        let gas_limit = outbound.out_tx_gas_limit;
        if gas_limit == 0 || outbound.out_tx_gas_price.is_empty() || outbound.out_tx_gas_price == "0" {
            return Ok(None);
        }
        let next_allowed = cctx
            .cctx_status
            .last_update_timestamp
            .saturating_add(flags.retry_interval_secs);
        if ctx.timestamp < next_allowed {
            return Ok(None);
        }

        let median = self.median_gas_price(chain_id)?;
        let increase = median
            .checked_mul(flags.gas_price_increase_percent as u128)
            .ok_or_else(|| CrosschainError::GasPriceOverflow("gas price increase".to_string()))?
            / 100;
        let additional_fees = (gas_limit as u128)
            .checked_mul(increase)
            .ok_or_else(|| CrosschainError::GasPriceOverflow("additional fees".to_string()))?;
        self.withdraw_from_gas_stability_pool(chain_id, additional_fees)?;

        let current_price: u128 = outbound
            .out_tx_gas_price
            .parse()
            .map_err(|_| CrosschainError::InvalidGasPrice(outbound.out_tx_gas_price.clone()))?;
        let new_price = current_price
            .checked_add(increase)
            .ok_or_else(|| CrosschainError::GasPriceOverflow(outbound.out_tx_gas_price.clone()))?;
        if let Some(current) = cctx.current_outbound_mut() {
            current.out_tx_gas_price = new_price.to_string();
        }
        cctx.cctx_status.last_update_timestamp = ctx.timestamp;
        self.store_mut().set_cctx(cctx);
        self.emit(Event::GasPriceIncreased {
            index: index.to_string(),
            gas_price_increase: increase,
            additional_fees,
        });
        Ok(Some(GasPriceIncrease {
            gas_price_increase: increase,
            additional_fees,
        }))
    }
}
