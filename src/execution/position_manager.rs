use anyhow::Context;

use crate::models::Order;
use crate::persistence::{OrderStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long,
}

/// Tracks the single open position slot and the cached quote balance
///
/// Every transition is written through to the order store. The in-memory
/// state follows the exchange: if a confirmed fill cannot be persisted the
/// position still changes and the persistence error is returned.
pub struct PositionManager {
    store: OrderStore,
    open: Option<Order>,
    balance: f64,
}

impl PositionManager {
    pub fn new(store: OrderStore) -> Self {
        Self {
            store,
            open: None,
            balance: 0.0,
        }
    }

    /// Reload the open position from the store
    ///
    /// An unreadable record leaves the manager flat and returns the error so
    /// the caller can report it.
    pub fn restore(&mut self) -> Result<Option<&Order>, StoreError> {
        match self.store.try_load() {
            Ok(order) => {
                self.open = order;
                Ok(self.open.as_ref())
            }
            Err(e) => {
                self.open = None;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> PositionState {
        if self.open.is_some() {
            PositionState::Long
        } else {
            PositionState::Flat
        }
    }

    pub fn open_position(&self) -> Option<&Order> {
        self.open.as_ref()
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn set_balance(&mut self, balance: f64) {
        self.balance = balance;
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    /// Record a confirmed BUY fill
    pub fn open_position_with(&mut self, order: Order) -> anyhow::Result<()> {
        if let Some(existing) = &self.open {
            anyhow::bail!("Already have open position (order {})", existing.order_id);
        }

        self.open = Some(order);
        if let Some(order) = &self.open {
            self.store
                .save(order)
                .with_context(|| format!("Position opened but not persisted to {}", self.store.path().display()))?;
        }
        Ok(())
    }

    /// Record a confirmed SELL fill, returning the position that was closed
    pub fn close_position(&mut self) -> anyhow::Result<Order> {
        let closed = self
            .open
            .take()
            .ok_or_else(|| anyhow::anyhow!("No open position to close"))?;

        self.store
            .clear()
            .with_context(|| format!("Position closed but {} not cleared", self.store.path().display()))?;
        Ok(closed)
    }
}
