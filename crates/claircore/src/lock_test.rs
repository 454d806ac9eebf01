use std::time::Duration;

use super::*;

fn service() -> InProcessLockService {
    InProcessLockService::new(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn try_lock_on_a_free_key_succeeds_and_holds_until_release() {
    let svc = service();
    let (token, guard) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "sha256:aaa").await.unwrap();
    assert!(!token.is_cancelled());
    guard.release();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn try_lock_on_a_held_key_leaves_it_held_until_release() {
    let svc = service();
    let (_t1, guard1) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "k").await.unwrap();
    assert!(svc.already_holds("k"));
    drop(guard1);
    assert!(!svc.already_holds("k"));
}

#[tokio::test]
async fn a_holder_re_locking_a_key_it_already_holds_gets_a_lock_botch_error() {
    let svc = service();
    let holder = LockHolder::new(1);
    let (_token, _guard) = svc.try_lock(holder, CancellationToken::new(), "k").await.unwrap();

    let err = svc.try_lock(holder, CancellationToken::new(), "k").await.unwrap_err();
    assert!(matches!(err, Error::LockBotch(ref k) if k == "k"));

    let err = svc.lock(holder, CancellationToken::new(), "k").await.unwrap_err();
    assert!(matches!(err, Error::LockBotch(ref k) if k == "k"));
}

#[tokio::test]
async fn a_different_holder_contending_for_a_held_key_is_not_a_lock_botch() {
    let svc = service();
    let (_token, _guard) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "k").await.unwrap();

    let (token, _guard2) = svc.try_lock(LockHolder::new(2), CancellationToken::new(), "k").await.unwrap();
    assert!(token.is_cancelled(), "a second holder's try_lock on a held key must be ordinary contention");
}

#[tokio::test]
async fn lock_blocks_until_the_holder_releases_then_acquires() {
    let svc = Arc::new(service());
    let (_token, guard) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "k").await.unwrap();

    let svc2 = svc.clone();
    let waiter = tokio::spawn(async move { svc2.lock(LockHolder::new(2), CancellationToken::new(), "k").await });

    tokio::time::sleep(Duration::from_millis(15)).await;
    guard.release();

    let (token, _guard2) = waiter.await.unwrap().unwrap();
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn parent_cancellation_aborts_a_blocked_lock_call() {
    let svc = Arc::new(service());
    let (_token, _guard) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "k").await.unwrap();

    let parent = CancellationToken::new();
    let svc2 = svc.clone();
    let parent2 = parent.clone();
    let waiter = tokio::spawn(async move { svc2.lock(LockHolder::new(2), parent2, "k").await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    parent.cancel();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn reconnect_cancels_every_live_lock_from_the_dead_generation() {
    let svc = service();
    let (token_a, _guard_a) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "a").await.unwrap();
    let (token_b, _guard_b) = svc.try_lock(LockHolder::new(2), CancellationToken::new(), "b").await.unwrap();
    assert!(!token_a.is_cancelled());
    assert!(!token_b.is_cancelled());

    let gen_before = svc.generation();
    svc.simulate_reconnect();
    assert!(svc.generation() > gen_before);
    assert!(token_a.is_cancelled());
    assert!(token_b.is_cancelled());
}

#[tokio::test]
async fn release_after_reconnect_is_tolerated_silently() {
    let svc = service();
    let (_token, guard) = svc.try_lock(LockHolder::new(1), CancellationToken::new(), "k").await.unwrap();
    svc.simulate_reconnect();
    // Must not panic even though the generation has already moved on.
    guard.release();
}
