use nods::pacer::SendPacer;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_first_send_is_immediate() {
    let pacer = SendPacer::new(1.0, 1);
    let start = Instant::now();
    pacer.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_spacing_at_one_per_second() {
    let pacer = SendPacer::new(1.0, 1);
    let start = Instant::now();
    for _ in 0..4 {
        pacer.acquire().await;
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3100), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_burst_allows_back_to_back_sends() {
    let pacer = SendPacer::new(2.0, 3);
    let start = Instant::now();
    for _ in 0..3 {
        pacer.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    pacer.acquire().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_idle_time_refills_bucket() {
    let pacer = SendPacer::new(1.0, 1);
    pacer.acquire().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let start = Instant::now();
    pacer.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_never_waits() {
    let pacer = SendPacer::new(0.0, 1);
    assert!(pacer.is_unlimited());
    let start = Instant::now();
    for _ in 0..50 {
        pacer.acquire().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_tiny_rate_waits_at_most_an_hour() {
    let pacer = SendPacer::new(1e-20, 1);
    let start = Instant::now();
    pacer.acquire().await;
    pacer.acquire().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3599), "{elapsed:?}");
    assert!(elapsed <= Duration::from_secs(3601), "{elapsed:?}");
}
