use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Checks allowed in flight at once.
pub const FILTER_PARALLELISM: usize = 500;

/// How often the filter reports how far it has got.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Runs `predicate` over every domain with bounded parallelism and returns
/// the domains it accepted, sorted.
pub async fn filter_parallel<F, Fut>(domains: Vec<String>, predicate: F) -> Vec<String>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(FILTER_PARALLELISM));
    let started = Arc::new(AtomicUsize::new(0));
    let reporter = tokio::spawn(report_progress(Arc::clone(&started)));

    let mut checks = JoinSet::new();
    for domain in domains {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        started.fetch_add(1, Ordering::Relaxed);
        let check = predicate(domain.clone());
        checks.spawn(async move {
            let keep = check.await;
            drop(permit);
            keep.then_some(domain)
        });
    }

    let mut kept = Vec::new();
    while let Some(outcome) = checks.join_next().await {
        match outcome {
            Ok(Some(domain)) => kept.push(domain),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "domain check did not finish"),
        }
    }
    reporter.abort();

    kept.sort();
    kept
}

async fn report_progress(started: Arc<AtomicUsize>) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        info!(
            started = started.load(Ordering::Relaxed),
            "still processing domains"
        );
    }
}
