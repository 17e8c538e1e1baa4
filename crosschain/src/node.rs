//! Block Loop
//!
//! Single-writer loop that orders submitted messages into blocks. Each tick
//! drains the submission queue in arrival order, applies every message to the
//! keeper with the block's context, answers each submitter, and then runs the
//! end-block gas price sweep.
//!
//! ## Determinism Requirements
//!
//! **CRITICAL**: The block timestamp is read once at the loop edge and handed
//! down. Nothing below this module reads the clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info};

use crate::error::CrosschainError;
use crate::keeper::{BlockContext, Keeper};
use crate::msg::{Msg, MsgResponse};
use crate::types::Event;

/// A queued message and the channel its result is sent back on.
pub struct Submission {
    pub msg: Msg,
    pub reply: oneshot::Sender<Result<MsgResponse, CrosschainError>>,
}

/// What one block did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: i64,
    pub timestamp: i64,
    pub applied: usize,
    pub rejected: usize,
    pub gas_price_updates: usize,
    pub events: Vec<Event>,
}

/// Cloneable handle used by the API to submit messages and read state.
#[derive(Clone)]
pub struct NodeHandle {
    submissions: mpsc::Sender<Submission>,
    keeper: Arc<RwLock<Keeper>>,
    last_block: Arc<RwLock<BlockSummary>>,
}

impl NodeHandle {
    /// Queues `msg` for the next block and waits for its result.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(MsgResponse))` - Message applied
    /// * `Ok(Err(CrosschainError))` - Message rejected by the keeper
    /// * `Err(anyhow::Error)` - Node stopped before answering
    pub async fn submit(&self, msg: Msg) -> Result<Result<MsgResponse, CrosschainError>> {
        let (reply, response) = oneshot::channel();
        self.submissions
            .send(Submission { msg, reply })
            .await
            .map_err(|_| anyhow::anyhow!("Block loop is not running"))?;
        response.await.context("Block loop dropped the submission")
    }

    pub fn keeper(&self) -> Arc<RwLock<Keeper>> {
        self.keeper.clone()
    }

    pub async fn last_block(&self) -> BlockSummary {
        self.last_block.read().await.clone()
    }
}

/// Owner of the keeper and the receiving end of the submission queue.
pub struct Node {
    keeper: Arc<RwLock<Keeper>>,
    submissions: mpsc::Receiver<Submission>,
    last_block: Arc<RwLock<BlockSummary>>,
    height: i64,
    block_time: Duration,
}

impl Node {
    /// Creates the node and its handle.
    ///
    /// # Arguments
    ///
    /// * `keeper` - Keeper holding the genesis state
    /// * `block_time` - Interval between blocks
    /// * `queue_capacity` - Maximum number of queued submissions
    pub fn new(keeper: Keeper, block_time: Duration, queue_capacity: usize) -> (Self, NodeHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let keeper = Arc::new(RwLock::new(keeper));
        let last_block = Arc::new(RwLock::new(BlockSummary::default()));
        let node = Self {
            keeper: keeper.clone(),
            submissions: rx,
            last_block: last_block.clone(),
            height: 0,
            block_time,
        };
        let handle = NodeHandle {
            submissions: tx,
            keeper,
            last_block,
        };
        (node, handle)
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    /// Produces one block from everything queued so far.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Block time in unix seconds
    pub async fn produce_block(&mut self, timestamp: i64) -> BlockSummary {
        let mut queued = Vec::new();
        while let Ok(submission) = self.submissions.try_recv() {
            queued.push(submission);
        }

        self.height += 1;
        let ctx = BlockContext {
            height: self.height,
            timestamp,
        };
        let mut summary = BlockSummary {
            height: ctx.height,
            timestamp,
            ..Default::default()
        };

        let mut keeper = self.keeper.write().await;
        for submission in queued {
            let result = keeper.deliver(&ctx, &submission.msg);
            match result {
                Ok(_) => summary.applied += 1,
                Err(_) => summary.rejected += 1,
            }
            // Submitter may have gone away; the block still counts the message.
            let _ = submission.reply.send(result);
        }
        summary.gas_price_updates = keeper.end_block(&ctx);
        summary.events = keeper.take_events();
        drop(keeper);

        if summary.applied + summary.rejected > 0 {
            info!(
                "Block {}: {} applied, {} rejected, {} events",
                summary.height,
                summary.applied,
                summary.rejected,
                summary.events.len()
            );
        } else {
            debug!("Block {}: empty", summary.height);
        }
        *self.last_block.write().await = summary.clone();
        summary
    }

    /// Produces blocks every `block_time` until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Block loop started, block time {:?}", self.block_time);
        let mut ticker = tokio::time::interval(self.block_time);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let timestamp = chrono::Utc::now().timestamp();
                    self.produce_block(timestamp).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Block loop stopping at height {}", self.height);
                        return Ok(());
                    }
                }
            }
        }
    }
}
