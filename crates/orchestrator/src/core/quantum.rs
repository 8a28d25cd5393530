//! The zero-time scheduling quantum.

/// Let every task made runnable by the last state change observe it before
/// the caller continues. Simulated time does not advance.
pub async fn next_quantum() {
    tokio::task::yield_now().await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tokio::sync::watch;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_waiter_observes_change_within_quantum() {
        let (tx, mut rx) = watch::channel(false);
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        tokio::spawn(async move {
            let _ = rx.wait_for(|v| *v).await;
            flag.store(true, Ordering::SeqCst);
        });
        next_quantum().await;

        let start = Instant::now();
        tx.send_replace(true);
        next_quantum().await;

        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(Instant::now(), start);
    }
}
