//! Optimistic local mutations with compensating rollback.
//!
//! Every user-visible mutation goes through [`optimistic`]: the local state
//! is changed first, the remote commit runs, and on failure the exact
//! snapshot captured by `apply` is handed to `rollback`.

use std::future::Future;

use tokio::sync::RwLock;

/// Apply a change to `state`, commit it remotely, undo it if the commit fails.
///
/// `apply` mutates the state and returns whatever is needed to undo that
/// mutation. The lock is not held while `commit` runs, so other updates
/// (e.g. realtime deliveries) may interleave with it.
pub async fn optimistic<S, Snap, T, E, A, C, R>(
    state: &RwLock<S>,
    apply: A,
    commit: C,
    rollback: R,
) -> Result<T, E>
where
    A: FnOnce(&mut S) -> Snap,
    C: Future<Output = Result<T, E>>,
    R: FnOnce(&mut S, Snap),
{
    try_optimistic(state, |s| Ok(apply(s)), commit, rollback).await
}

/// Like [`optimistic`], but `apply` may refuse the change. A refusal is
/// returned as is and `commit` never runs. The precondition is checked under
/// the same write lock that applies the change.
pub async fn try_optimistic<S, Snap, T, E, A, C, R>(
    state: &RwLock<S>,
    apply: A,
    commit: C,
    rollback: R,
) -> Result<T, E>
where
    A: FnOnce(&mut S) -> Result<Snap, E>,
    C: Future<Output = Result<T, E>>,
    R: FnOnce(&mut S, Snap),
{
    let snapshot = {
        let mut guard = state.write().await;
        apply(&mut guard)?
    };

    match commit.await {
        Ok(value) => Ok(value),
        Err(err) => {
            let mut guard = state.write().await;
            rollback(&mut guard, snapshot);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        flags: Vec<bool>,
        unread: usize,
    }

    fn counter() -> RwLock<Counter> {
        RwLock::new(Counter {
            flags: vec![false, true, false],
            unread: 2,
        })
    }

    fn mark_all(c: &mut Counter) -> Counter {
        let before = c.clone();
        c.flags.iter_mut().for_each(|f| *f = true);
        c.unread = 0;
        before
    }

    #[tokio::test]
    async fn successful_commit_keeps_the_change() {
        let state = counter();
        let result: Result<u8, &str> =
            optimistic(&state, mark_all, async { Ok(3) }, |c, before| *c = before).await;

        assert_eq!(result, Ok(3));
        let c = state.read().await;
        assert_eq!(c.unread, 0);
        assert!(c.flags.iter().all(|f| *f));
    }

    #[tokio::test]
    async fn failed_commit_restores_the_snapshot() {
        let state = counter();
        let original = state.read().await.clone();

        let result: Result<(), &str> =
            optimistic(&state, mark_all, async { Err("offline") }, |c, before| *c = before).await;

        assert_eq!(result, Err("offline"));
        assert_eq!(*state.read().await, original);
    }

    #[tokio::test]
    async fn state_is_updated_before_commit_resolves() {
        let state = counter();
        let result: Result<(), ()> = optimistic(
            &state,
            mark_all,
            async {
                // The optimistic change is visible while the commit is in flight.
                assert_eq!(state.read().await.unread, 0);
                Ok(())
            },
            |c, before| *c = before,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn refused_apply_skips_the_commit() {
        let state = counter();
        let original = state.read().await.clone();
        let committed = std::sync::atomic::AtomicBool::new(false);

        let result: Result<(), &str> = try_optimistic(
            &state,
            |c: &mut Counter| if c.unread > 0 { Err("unread") } else { Ok(mark_all(c)) },
            async {
                committed.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
            |c, before| *c = before,
        )
        .await;

        assert_eq!(result, Err("unread"));
        assert!(!committed.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(*state.read().await, original);
    }
}
