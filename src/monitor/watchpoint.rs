//! Fixed-capacity watchpoint pool.
//!
//! Slots are allocated once and threaded onto one of two singly linked lists
//! by index: `active` (ascending by id) and `free` (LIFO).

use log::{debug, warn};
use thiserror::Error;

use super::expr::{Environment, Evaluator, ExprError, MAX_TOKEN_LEN};

pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchpoint {
    id: usize,
    expr: String,
    value: u32,
    next: Option<usize>,
}

impl Watchpoint {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Value observed at the last scan, or when the watchpoint was set.
    pub fn value(&self) -> u32 {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchpointHit {
    pub id: usize,
    pub expr: String,
    pub old: u32,
    pub new: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchpointError {
    #[error("no free watchpoint (capacity {capacity})")]
    PoolExhausted { capacity: usize },
    #[error("no watchpoint number {0}")]
    UnknownId(usize),
    #[error("expression is longer than {max} characters", max = MAX_TOKEN_LEN)]
    ExpressionTooLong,
    #[error(transparent)]
    Expr(#[from] ExprError),
}

#[derive(Debug)]
pub struct WatchpointPool {
    slots: Vec<Watchpoint>,
    active: Option<usize>,
    free: Option<usize>,
}

impl Default for WatchpointPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WatchpointPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|id| Watchpoint {
                id,
                expr: String::new(),
                value: 0,
                next: (id + 1 < capacity).then_some(id + 1),
            })
            .collect();
        Self {
            slots,
            active: None,
            free: (capacity > 0).then_some(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }

    /// Evaluate `expr` once and, on success, watch it in the slot at the
    /// head of the free list. The most recently released slot is reused
    /// first.
    pub fn acquire(
        &mut self,
        expr: &str,
        evaluator: &mut Evaluator,
        env: &dyn Environment,
    ) -> Result<&Watchpoint, WatchpointError> {
        if expr.len() > MAX_TOKEN_LEN {
            return Err(WatchpointError::ExpressionTooLong);
        }
        let Some(id) = self.free else {
            return Err(WatchpointError::PoolExhausted {
                capacity: self.capacity(),
            });
        };
        let value = evaluator.evaluate(expr, env)?;

        self.free = self.slots[id].next;

        let mut prev: Option<usize> = None;
        let mut cursor = self.active;
        while let Some(i) = cursor {
            if i > id {
                break;
            }
            prev = Some(i);
            cursor = self.slots[i].next;
        }

        let slot = &mut self.slots[id];
        slot.expr = expr.to_string();
        slot.value = value;
        slot.next = cursor;
        match prev {
            Some(p) => self.slots[p].next = Some(id),
            None => self.active = Some(id),
        }

        debug!("watchpoint {id} set on `{expr}` = {value:#x}");
        Ok(&self.slots[id])
    }

    pub fn release(&mut self, id: usize) -> Result<Watchpoint, WatchpointError> {
        let mut prev: Option<usize> = None;
        let mut cursor = self.active;
        while let Some(i) = cursor {
            if i == id {
                break;
            }
            prev = Some(i);
            cursor = self.slots[i].next;
        }
        if cursor.is_none() {
            return Err(WatchpointError::UnknownId(id));
        }

        let next = self.slots[id].next;
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.active = next,
        }

        let slot = &mut self.slots[id];
        let released = Watchpoint {
            id,
            expr: std::mem::take(&mut slot.expr),
            value: slot.value,
            next: None,
        };
        slot.value = 0;
        slot.next = self.free;
        self.free = Some(id);

        debug!("watchpoint {id} on `{}` deleted", released.expr);
        Ok(released)
    }

    /// Re-evaluate every active watchpoint and report the ones whose value
    /// changed. Expressions that fail to evaluate keep their old value.
    pub fn scan(&mut self, evaluator: &mut Evaluator, env: &dyn Environment) -> Vec<WatchpointHit> {
        let mut hits = Vec::new();
        let mut cursor = self.active;
        while let Some(i) = cursor {
            let slot = &mut self.slots[i];
            cursor = slot.next;
            match evaluator.evaluate(&slot.expr, env) {
                Ok(new) if new != slot.value => {
                    hits.push(WatchpointHit {
                        id: i,
                        expr: slot.expr.clone(),
                        old: slot.value,
                        new,
                    });
                    slot.value = new;
                }
                Ok(_) => {}
                Err(err) => warn!("watchpoint {i} on `{}`: {err}", slot.expr),
            }
        }
        hits
    }

    /// Active watchpoints in ascending id order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: &self.slots,
            cursor: self.active,
        }
    }
}

pub struct Iter<'a> {
    slots: &'a [Watchpoint],
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Watchpoint;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = &self.slots[self.cursor?];
        self.cursor = slot.next;
        Some(slot)
    }
}
