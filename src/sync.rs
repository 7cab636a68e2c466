// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helper that recovers from poisoning instead of panicking.
//!
//! A panic while a lock is held poisons it. The background worker must keep
//! serving other requests after one of them misbehaves, so every lock in the
//! crate is taken through [`resilient_lock`]: a poisoned lock is logged and its
//! data used as is.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex, recovering from poisoning if necessary.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "assetcache::sync",
                event = "LOCK_POISONED",
                "Mutex was poisoned; a thread panicked while holding it. Recovering data."
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_recovers_poisoned_mutex() {
        let lock = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(lock.is_poisoned());

        *resilient_lock(&lock) += 1;
        assert_eq!(*resilient_lock(&lock), 2);
    }
}
