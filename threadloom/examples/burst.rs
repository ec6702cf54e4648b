use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use threadloom::{logging, PoolConfig, RejectedExecution, ThreadPool};

const TASKS: usize = 64;

// Fires a burst of short sleeping tasks at a small pool, then waits for it to
// shrink back to its core size.
fn main() -> Result<(), Box<dyn Error>> {
    logging::init_development();

    let config = PoolConfig::new(2, 8, 4, Duration::from_millis(500), 4)
        .with_enqueue_timeout(Duration::from_millis(250))
        .with_thread_name_prefix("burst-");
    let pool = ThreadPool::new(config)?;
    let done = Arc::new(AtomicUsize::new(0));
    let mut rejected = 0;

    let started = Instant::now();
    for i in 0..TASKS {
        let done = done.clone();
        let task = move || {
            thread::sleep(Duration::from_millis(10 + (i % 5) as u64 * 5));
            done.fetch_add(1, Ordering::SeqCst);
        };
        match pool.execute(task) {
            Ok(()) => {}
            Err(e @ RejectedExecution::Overloaded { .. }) => {
                println!("task {} rejected: {}", i, e);
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!(
        "submitted {} tasks in {:?}, pool grew to {} workers",
        TASKS,
        started.elapsed(),
        pool.pool_size()
    );

    let summed = pool.submit(|| (1..=100u64).sum::<u64>())?;
    println!("side computation: {}", summed.get()?);

    while done.load(Ordering::SeqCst) + rejected < TASKS {
        thread::sleep(Duration::from_millis(10));
    }
    println!("{} tasks finished in {:?}", done.load(Ordering::SeqCst), started.elapsed());

    // Give surplus workers time to pass their keep-alive
    thread::sleep(Duration::from_secs(1));
    println!(
        "after idling: {} workers (created {} in total)",
        pool.pool_size(),
        pool.workers_created()
    );

    pool.shutdown();
    if !pool.await_termination(Duration::from_secs(5)) {
        println!("workers did not exit in time");
    }
    Ok(())
}
