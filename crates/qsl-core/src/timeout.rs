//! Single-slot deadline scheduler.

/// Holds at most one item with a deadline.
///
/// Scheduling overwrites whatever was armed before. [`poll`](Self::poll)
/// clears the slot before handing the item out, so the handler is free to
/// schedule the next item.
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor<T> {
    slot: Option<(u64, T)>,
}

impl<T> Default for TimeoutSupervisor<T> {
    fn default() -> Self {
        TimeoutSupervisor { slot: None }
    }
}

impl<T> TimeoutSupervisor<T> {
    /// Create an empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `item` to fire `delay_ms` after `now_ms`.
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64, item: T) {
        self.slot = Some((now_ms.saturating_add(delay_ms), item));
    }

    /// Disarm, returning whatever was armed.
    pub fn cancel(&mut self) -> Option<T> {
        self.slot.take().map(|(_, item)| item)
    }

    /// Disarm only if the armed item satisfies `predicate`.
    pub fn cancel_if(&mut self, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        match &self.slot {
            Some((_, item)) if predicate(item) => self.cancel(),
            _ => None,
        }
    }

    /// Take the item if its deadline has been reached.
    pub fn poll(&mut self, now_ms: u64) -> Option<T> {
        match &self.slot {
            Some((deadline, _)) if now_ms >= *deadline => self.cancel(),
            _ => None,
        }
    }

    /// The armed item.
    pub fn pending(&self) -> Option<&T> {
        self.slot.as_ref().map(|(_, item)| item)
    }
}
