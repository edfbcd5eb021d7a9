// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry combinators for store writes.

use std::future::Future;
use std::time::Duration;

use beacon_core::error::BeaconError;
use beacon_core::resource::Resource;
use tracing::{debug, warn};

/// Applies `update` to `current`, refetching and re-applying on conflict.
///
/// Fails with [`BeaconError::IdentityMismatch`] when the refetched object has
/// a different uid (it was deleted and recreated), and with
/// [`BeaconError::RetryExhausted`] after `attempts` conflicting writes.
/// Errors from `refetch`, and non-conflict errors from `update`, are
/// returned as they are.
pub async fn update_with_retry<K, R, RFut, U, UFut>(
    mut current: K,
    attempts: u32,
    mut refetch: R,
    mut update: U,
) -> Result<K, BeaconError>
where
    K: Resource,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<K, BeaconError>>,
    U: FnMut(K) -> UFut,
    UFut: Future<Output = Result<K, BeaconError>>,
{
    let attempts = attempts.max(1);
    let uid = current.uid().to_string();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match update(current.clone()).await {
            Ok(written) => return Ok(written),
            Err(e) if e.is_conflict() => e,
            Err(e) => return Err(e),
        };

        if attempt >= attempts {
            return Err(BeaconError::RetryExhausted {
                attempts,
                last: Box::new(err),
            });
        }

        debug!(kind = K::KIND, key = %current.key(), attempt, "write conflict, refetching");
        current = refetch().await?;
        if current.uid() != uid {
            return Err(BeaconError::IdentityMismatch {
                kind: K::KIND.to_string(),
                name: current.key().to_string(),
                expected: uid,
                found: current.uid().to_string(),
            });
        }
    }
}

/// Persists with `write`, retrying transient failures after a fixed `delay`.
///
/// Returns `Ok(None)` when the object no longer exists. A conflict aborts
/// immediately: someone else wrote the object and this write is stale.
pub async fn persist_with_retry<K, W, WFut>(
    attempts: u32,
    delay: Duration,
    mut write: W,
) -> Result<Option<K>, BeaconError>
where
    W: FnMut() -> WFut,
    WFut: Future<Output = Result<K, BeaconError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match write().await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) if e.is_conflict() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(BeaconError::RetryExhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "status write failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
