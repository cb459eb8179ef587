//! Per-row exclusion (§3, §5). A single registry keyed by row, with opaque
//! monotonically-drawn lock tokens; the reverse token→row mapping exists
//! only so lease expiry can release a lock without knowing the row (§9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::key::RowKey;

pub type LockToken = u64;

struct State {
    row_to_token: HashMap<RowKey, LockToken>,
    token_to_row: HashMap<LockToken, RowKey>,
}

pub struct RowLockRegistry {
    state: Mutex<State>,
    condvar: Condvar,
    next_token: AtomicU64,
    outstanding: AtomicU64,
}

impl Default for RowLockRegistry {
    fn default() -> Self {
        RowLockRegistry::new()
    }
}

impl RowLockRegistry {
    pub fn new() -> Self {
        RowLockRegistry {
            state: Mutex::new(State {
                row_to_token: HashMap::new(),
                token_to_row: HashMap::new(),
            }),
            condvar: Condvar::new(),
            next_token: AtomicU64::new(1),
            outstanding: AtomicU64::new(0),
        }
    }

    /// Block until `row` is free, then take it. Returns the token to pass
    /// back to `release`.
    pub fn lock(&self, row: &RowKey) -> LockToken {
        let mut state = self.state.lock().unwrap();
        while state.row_to_token.contains_key(row) {
            state = self.condvar.wait(state).unwrap();
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        state.row_to_token.insert(row.clone(), token);
        state.token_to_row.insert(token, row.clone());
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        token
    }

    /// Release a lock taken via `lock`. A no-op if the token is unknown
    /// (e.g. already reclaimed by lease expiry — §5).
    pub fn release(&self, token: LockToken) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.token_to_row.remove(&token) {
            state.row_to_token.remove(&row);
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.condvar.notify_all();
        }
    }

    /// Force-release a row's lock regardless of token, as an external lease
    /// service reclaiming an expired lock would.
    pub fn expire_row(&self, row: &RowKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = state.row_to_token.remove(row) {
            state.token_to_row.remove(&token);
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.condvar.notify_all();
        }
    }

    pub fn is_locked(&self, token: LockToken) -> bool {
        self.state.lock().unwrap().token_to_row.contains_key(&token)
    }

    pub fn outstanding_count(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Block until every outstanding row lock has been released — used by
    /// `Region::close` to drain writers before tearing down stores.
    pub fn wait_for_drain(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.row_to_token.is_empty() {
            state = self.condvar.wait(state).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_row_blocks_until_release() {
        let registry = std::sync::Arc::new(RowLockRegistry::new());
        let row = b"r1".to_vec();
        let token = registry.lock(&row);
        assert_eq!(registry.outstanding_count(), 1);

        let registry2 = registry.clone();
        let row2 = row.clone();
        let handle = std::thread::spawn(move || registry2.lock(&row2));

        std::thread::sleep(std::time::Duration::from_millis(50));
        registry.release(token);
        let second_token = handle.join().unwrap();
        assert!(registry.is_locked(second_token));
        registry.release(second_token);
        assert_eq!(registry.outstanding_count(), 0);
    }

    #[test]
    fn expire_row_releases_without_the_token() {
        let registry = RowLockRegistry::new();
        let row = b"r1".to_vec();
        let token = registry.lock(&row);
        registry.expire_row(&row);
        assert!(!registry.is_locked(token));
    }
}
