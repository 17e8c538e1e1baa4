//! CCTX State Machine
//!
//! Creates CCTXs from finalized inbound ballots and advances them on
//! finalized outbound ballots:
//!
//! ```text
//! PendingInbound -> PendingOutbound -> OutboundMined
//! PendingOutbound -> PendingRevert -> Reverted
//! any pending state -> Aborted (refund attempted on the origin chain)
//! ```

use tracing::{info, warn};

use super::{BlockContext, Keeper};
use crate::error::{CrosschainError, Result};
use crate::msg::{MsgResponse, MsgVoteOnObservedInboundTx, MsgVoteOnObservedOutboundTx};
use crate::types::{
    BallotStatus, CctxStatus, CoinType, CrossChainTx, Event, InboundParams, ObservationType,
    OutboundParams, Status, VoteType,
};

/// Share of unused outbound fees returned to the gas stability pool.
pub const REMAINING_FEES_TO_STABILITY_POOL_PERCENT: u128 = 95;

impl Keeper {
    // ========================================================================
    // INBOUND
    // ========================================================================

    /// Records an inbound vote and creates the CCTX when the ballot finalizes.
    ///
    /// # Returns
    ///
    /// * `Ok(MsgResponse)` - Vote recorded; `cctx_index` is set on finalization
    /// * `Err(CrosschainError::NotAuthorized)` - Creator is not an observer of both chains
    /// * `Err(CrosschainError::NotEnoughPermissions)` - Inbound processing disabled
    /// * `Err(CrosschainError::CannotFindTssKeys)` - No current TSS
    pub fn vote_on_observed_inbound_tx(
        &mut self,
        ctx: &BlockContext,
        msg: &MsgVoteOnObservedInboundTx,
    ) -> Result<MsgResponse> {
        if !self.is_authorized_observer(&msg.creator, msg.sender_chain_id)
            || !self.is_authorized_observer(&msg.creator, msg.receiver_chain)
        {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        let index = msg.digest()?;
        let voters = self.store().observers().to_vec();
        let threshold = self.store().params().ballot_threshold;
        let (_, finalized) = self.vote_on_ballot(
            ctx,
            &index,
            voters,
            ObservationType::InboundTx,
            threshold,
            &msg.creator,
            VoteType::SuccessObservation,
        )?;
        let mut response = MsgResponse {
            ballot_identifier: Some(index.clone()),
            finalized,
            cctx_index: None,
        };
        if !finalized {
            return Ok(response);
        }

        if !self.store().flags().is_inbound_enabled {
            return Err(CrosschainError::NotEnoughPermissions(
                "inbound processing is disabled".to_string(),
            ));
        }
        if self.store().get_tss().is_none() {
            return Err(CrosschainError::CannotFindTssKeys);
        }

        let cctx = create_new_cctx(ctx, msg, &index);
        self.process_new_cctx(ctx, cctx, msg.receiver_chain);
        response.cctx_index = Some(index);
        Ok(response)
    }

    /// Prices and numbers the outbound of a fresh CCTX, aborting it on failure.
    fn process_new_cctx(&mut self, ctx: &BlockContext, mut cctx: CrossChainTx, receiver_chain: i64) {
        let mut attempt = cctx.clone();
        let processed = self.with_cache(|k| {
            k.set_outbound_gas_price(receiver_chain, &mut attempt)?;
            k.update_nonce(receiver_chain, &mut attempt)?;
            attempt.change_status(CctxStatus::PendingOutbound, "", ctx.timestamp)?;
            Ok(())
        });
        match processed {
            Ok(()) => {
                cctx = attempt;
                info!(
                    "CCTX {} created: outbound to chain {} with nonce {}",
                    cctx.index,
                    receiver_chain,
                    cctx.current_outbound_or_default().out_tx_tss_nonce
                );
            }
            Err(e) => {
                warn!("CCTX {} could not be processed: {}", cctx.index, e);
                self.abort_cctx(ctx, &mut cctx, e.to_string());
            }
        }
        self.emit(Event::CctxCreated {
            index: cctx.index.clone(),
            status: cctx.cctx_status.status,
        });
        self.store_mut().set_cctx(cctx);
    }

    /// Sets the current outbound gas price from the chain's median.
    pub(crate) fn set_outbound_gas_price(&self, chain_id: i64, cctx: &mut CrossChainTx) -> Result<()> {
        let median = self.median_gas_price(chain_id)?;
        if let Some(outbound) = cctx.current_outbound_mut() {
            outbound.out_tx_gas_price = median.to_string();
        }
        Ok(())
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    /// Records an outbound vote and advances the CCTX when the ballot finalizes.
    ///
    /// # Returns
    ///
    /// * `Ok(MsgResponse)` - Vote recorded; CCTX advanced on finalization
    /// * `Err(CrosschainError::CctxNotFound | CctxNotPending | OutboundMismatch)` - Vote targets no in-flight outbound
    pub fn vote_on_observed_outbound_tx(
        &mut self,
        ctx: &BlockContext,
        msg: &MsgVoteOnObservedOutboundTx,
    ) -> Result<MsgResponse> {
        if !self.is_authorized_observer(&msg.creator, msg.outtx_chain) {
            return Err(CrosschainError::NotAuthorized(msg.creator.clone()));
        }
        let index = msg.digest()?;
        if let Some(ballot) = self.store().get_ballot(&index).cloned() {
            if ballot.ballot_status.is_finalized() {
                // late vote: recorded for the tally, consequence already applied
                self.add_vote(ballot, &msg.creator, msg.status.to_vote_type())?;
                return Ok(MsgResponse {
                    ballot_identifier: Some(index),
                    finalized: false,
                    cctx_index: Some(msg.cctx_hash.clone()),
                });
            }
        }
        let mut cctx = self
            .store()
            .get_cctx(&msg.cctx_hash)
            .cloned()
            .ok_or_else(|| CrosschainError::CctxNotFound(msg.cctx_hash.clone()))?;
        if !cctx.cctx_status.status.is_pending_outbound() {
            return Err(CrosschainError::CctxNotPending(cctx.index.clone()));
        }
        let current = cctx.current_outbound_or_default();
        if current.receiver_chain_id != msg.outtx_chain || current.out_tx_tss_nonce != msg.outtx_tss_nonce {
            return Err(CrosschainError::OutboundMismatch {
                expected_chain: current.receiver_chain_id,
                expected_nonce: current.out_tx_tss_nonce,
                chain: msg.outtx_chain,
                nonce: msg.outtx_tss_nonce,
            });
        }

        let voters = self.store().observers().to_vec();
        let threshold = self.store().params().ballot_threshold;
        let (ballot, finalized) = self.vote_on_ballot(
            ctx,
            &index,
            voters,
            ObservationType::OutboundTx,
            threshold,
            &msg.creator,
            msg.status.to_vote_type(),
        )?;
        let response = MsgResponse {
            ballot_identifier: Some(index.clone()),
            finalized,
            cctx_index: Some(cctx.index.clone()),
        };
        if !finalized {
            return Ok(response);
        }

        if let Some(outbound) = cctx.current_outbound_mut() {
            outbound.out_tx_ballot_index = index.clone();
            outbound.out_tx_observed_hash = msg.observed_outtx_hash.clone();
            outbound.out_tx_observed_external_height = msg.observed_outtx_block_height;
            outbound.out_tx_gas_used = msg.observed_outtx_gas_used;
            outbound.out_tx_effective_gas_price = msg.observed_outtx_effective_gas_price;
            outbound.out_tx_effective_gas_limit = msg.observed_outtx_effective_gas_limit;
        }
        // the nonce is consumed on the target chain whatever the outcome
        self.remove_from_pending_nonces(&current.tss_pubkey, current.receiver_chain_id, current.out_tx_tss_nonce);
        self.store_mut()
            .remove_out_tx_tracker(current.receiver_chain_id, current.out_tx_tss_nonce);

        match ballot.ballot_status {
            BallotStatus::FinalizedSuccess => self.finalize_outbound_success(ctx, &mut cctx)?,
            BallotStatus::FinalizedFailure => self.finalize_outbound_failure(ctx, &mut cctx),
            BallotStatus::InProgress => {}
        }
        self.store_mut().set_cctx(cctx);
        Ok(response)
    }

    fn finalize_outbound_success(&mut self, ctx: &BlockContext, cctx: &mut CrossChainTx) -> Result<()> {
        let next = if cctx.is_current_outbound_revert() {
            CctxStatus::Reverted
        } else {
            CctxStatus::OutboundMined
        };
        self.transition(ctx, cctx, next, "outbound confirmed")?;
        let outbound = cctx.current_outbound_or_default();
        if let Err(e) = self.fund_gas_stability_pool_from_remaining_fees(&outbound, outbound.receiver_chain_id) {
            warn!(
                "CCTX {}: failed to fund gas stability pool from remaining fees: {}",
                cctx.index, e
            );
        }
        Ok(())
    }

    fn finalize_outbound_failure(&mut self, ctx: &BlockContext, cctx: &mut CrossChainTx) {
        if cctx.is_current_outbound_revert() || cctx.cctx_status.status == CctxStatus::PendingRevert {
            self.abort_cctx(ctx, cctx, "revert outbound failed");
            return;
        }
        let mut attempt = cctx.clone();
        let reverted = self.with_cache(|k| {
            let gas_limit = attempt.current_outbound_or_default().out_tx_gas_limit;
            attempt.add_revert_outbound(gas_limit)?;
            let sender_chain = attempt.inbound_tx_params.sender_chain_id;
            k.set_outbound_gas_price(sender_chain, &mut attempt)?;
            k.update_nonce(sender_chain, &mut attempt)?;
            k.transition(ctx, &mut attempt, CctxStatus::PendingRevert, "outbound failed, reverting")?;
            Ok(())
        });
        match reverted {
            Ok(()) => *cctx = attempt,
            Err(e) => {
                warn!("CCTX {}: revert not possible: {}", cctx.index, e);
                self.abort_cctx(ctx, cctx, format!("outbound failed and revert not possible: {}", e));
            }
        }
    }

    /// Changes status and emits the transition event.
    fn transition(
        &mut self,
        ctx: &BlockContext,
        cctx: &mut CrossChainTx,
        next: CctxStatus,
        message: impl Into<String>,
    ) -> Result<()> {
        let from = cctx.cctx_status.status;
        let message = message.into();
        cctx.change_status(next, message.clone(), ctx.timestamp)?;
        info!("CCTX {}: {} -> {}", cctx.index, from, next);
        self.emit(Event::CctxStatusChanged {
            index: cctx.index.clone(),
            from,
            to: next,
            message,
        });
        Ok(())
    }

    // ========================================================================
    // ABORT AND REFUND
    // ========================================================================

    /// Marks the CCTX `Aborted` and attempts a refund on the origin chain.
    ///
    /// A failed refund is logged and reported as an event; the abort stands.
    pub fn abort_cctx(&mut self, ctx: &BlockContext, cctx: &mut CrossChainTx, message: impl Into<String>) {
        if let Err(e) = self.transition(ctx, cctx, CctxStatus::Aborted, message) {
            warn!("CCTX {} cannot be aborted: {}", cctx.index, e);
            return;
        }
        if let Err(e) = self.refund_amount_on_origin(cctx) {
            warn!("CCTX {}: refund on origin chain failed: {}", cctx.index, e);
            self.emit(Event::RefundFailed {
                index: cctx.index.clone(),
                reason: e.to_string(),
            });
        }
    }

    /// Credits the current outbound's amount back to the sender in the ledger token of the asset.
    ///
    /// The current outbound carries the latest amount of the transfer, which
    /// can differ from what was observed inbound.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Refund recorded
    /// * `Err(CrosschainError::InvalidCoinType)` - Only fungible tokens are refundable
    /// * `Err(CrosschainError::InvalidChain)` - Sender chain is not an EVM chain
    /// * `Err(CrosschainError::InvalidSender | InvalidAmount)` - Nothing to refund to
    /// * `Err(CrosschainError::ForeignCoinNotFound)` - Asset has no ledger mapping
    pub fn refund_amount_on_origin(&mut self, cctx: &CrossChainTx) -> Result<()> {
        let inbound = &cctx.inbound_tx_params;
        if inbound.coin_type != CoinType::Erc20 {
            return Err(CrosschainError::InvalidCoinType(format!("{:?}", inbound.coin_type)));
        }
        let is_evm = self
            .store()
            .get_chain(inbound.sender_chain_id)
            .map(|c| c.is_evm_chain())
            .unwrap_or(false);
        if !is_evm {
            return Err(CrosschainError::InvalidChain(inbound.sender_chain_id));
        }
        if inbound.sender.is_empty() || is_zero_address(&inbound.sender) {
            return Err(CrosschainError::InvalidSender);
        }
        let amount = cctx.current_outbound_or_default().amount;
        if amount == 0 {
            return Err(CrosschainError::InvalidAmount);
        }
        let zrc20 = self
            .store()
            .get_foreign_coin_from_asset(&inbound.asset, inbound.sender_chain_id)
            .map(|c| c.zrc20_contract_address.clone())
            .ok_or_else(|| CrosschainError::ForeignCoinNotFound {
                chain_id: inbound.sender_chain_id,
                asset: inbound.asset.clone(),
            })?;

        let balance = self.store().refund_balance(&zrc20, &inbound.sender);
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| CrosschainError::InvalidRequest("refund balance overflow".to_string()))?;
        self.store_mut().set_refund_balance(&zrc20, &inbound.sender, updated);
        info!(
            "CCTX {}: refunded {} of {} to {}",
            cctx.index, amount, zrc20, inbound.sender
        );
        self.emit(Event::RefundIssued {
            index: cctx.index.clone(),
            receiver: inbound.sender.clone(),
            zrc20,
            amount,
        });
        Ok(())
    }

    // ========================================================================
    // REMAINING FEES
    // ========================================================================

    /// Returns unused outbound fees to the chain's gas stability pool.
    ///
    /// Funds `(gas_limit - gas_used) * effective_gas_price * 95 / 100` when
    /// all three inputs are non-zero; otherwise does nothing.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Pool funded, or nothing to fund
    /// * `Err(CrosschainError::InvalidGasUsage)` - More gas used than the limit
    pub fn fund_gas_stability_pool_from_remaining_fees(
        &mut self,
        outbound: &OutboundParams,
        chain_id: i64,
    ) -> Result<()> {
        let gas_limit = outbound.out_tx_effective_gas_limit;
        let gas_used = outbound.out_tx_gas_used;
        let gas_price = outbound.out_tx_effective_gas_price;
        if gas_limit == 0 || gas_used == 0 || gas_price == 0 {
            return Ok(());
        }
        if gas_limit < gas_used {
            return Err(CrosschainError::InvalidGasUsage { gas_limit, gas_used });
        }
        let remaining_fees = ((gas_limit - gas_used) as u128)
            .checked_mul(gas_price)
            .ok_or_else(|| CrosschainError::GasPriceOverflow("remaining fees".to_string()))?;
        let amount = remaining_fees
            .checked_mul(REMAINING_FEES_TO_STABILITY_POOL_PERCENT)
            .ok_or_else(|| CrosschainError::GasPriceOverflow("remaining fees share".to_string()))?
            / 100;
        self.fund_gas_stability_pool(chain_id, amount)
    }
}

/// Builds a `PendingInbound` CCTX from an inbound claim.
fn create_new_cctx(ctx: &BlockContext, msg: &MsgVoteOnObservedInboundTx, index: &str) -> CrossChainTx {
    CrossChainTx {
        creator: msg.creator.clone(),
        index: index.to_string(),
        relayed_message: msg.message.clone(),
        cctx_status: Status {
            status: CctxStatus::PendingInbound,
            status_message: String::new(),
            last_update_timestamp: ctx.timestamp,
        },
        inbound_tx_params: InboundParams {
            sender: msg.sender.clone(),
            sender_chain_id: msg.sender_chain_id,
            tx_origin: msg.tx_origin.clone(),
            coin_type: msg.coin_type,
            asset: msg.asset.clone(),
            amount: msg.amount,
            inbound_tx_observed_hash: msg.in_tx_hash.clone(),
            inbound_tx_observed_external_height: msg.in_block_height,
            inbound_tx_ballot_index: index.to_string(),
            inbound_tx_finalized_height: ctx.height,
        },
        outbound_tx_params: vec![OutboundParams {
            receiver: msg.receiver.clone(),
            receiver_chain_id: msg.receiver_chain,
            coin_type: msg.coin_type,
            amount: msg.amount,
            out_tx_gas_limit: msg.gas_limit,
            ..Default::default()
        }],
    }
}

fn is_zero_address(address: &str) -> bool {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    !stripped.is_empty() && stripped.chars().all(|c| c == '0')
}
