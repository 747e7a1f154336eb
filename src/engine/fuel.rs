use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// How many VM instructions run between fuel hook invocations.
pub const STRIDE: u32 = 1000;

/// The instruction budget shared with the interpreter hook. Refilled from
/// the configured limit at the start of every eval; a limit of zero disables
/// enforcement.
#[derive(Clone)]
pub struct Fuel {
    state: Arc<State>,
}

struct State {
    remaining: AtomicI64,
    limit: AtomicI64,
    exhausted: AtomicBool,
}

impl Fuel {
    pub fn new(limit: u64) -> Self {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Fuel {
            state: Arc::new(State {
                remaining: AtomicI64::new(limit),
                limit: AtomicI64::new(limit),
                exhausted: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_limit(&self, limit: u64) {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.state.limit.store(limit, Ordering::Relaxed);
    }

    pub fn refill(&self) {
        let limit = self.state.limit.load(Ordering::Relaxed);
        self.state.remaining.store(limit, Ordering::Relaxed);
        self.state.exhausted.store(false, Ordering::Relaxed);
    }

    /// Burn one stride of instructions. Returns `false` once the budget is
    /// spent, which the hook turns into the fuel death of the script.
    pub fn consume(&self, amount: u32) -> bool {
        if self.state.limit.load(Ordering::Relaxed) == 0 {
            return true;
        }
        let amount = i64::from(amount);
        let rest = self.state.remaining.fetch_sub(amount, Ordering::Relaxed) - amount;
        if rest <= 0 {
            self.state.exhausted.store(true, Ordering::Relaxed);
            false
        } else {
            true
        }
    }

    /// Whether the current eval died of fuel exhaustion. Cleared by
    /// [`Fuel::refill`].
    pub fn exhausted(&self) -> bool {
        self.state.exhausted.load(Ordering::Relaxed)
    }
}
