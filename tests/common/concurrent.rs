use std::sync::Barrier;
use std::thread;

/// Run `op(thread_id)` on `num_threads` scoped threads released together.
pub fn run_scoped_with_barrier<F>(num_threads: usize, op: F)
where
    F: Fn(usize) + Sync,
{
    let barrier = Barrier::new(num_threads);
    thread::scope(|s| {
        for thread_id in 0..num_threads {
            let (barrier, op) = (&barrier, &op);
            s.spawn(move || {
                barrier.wait();
                op(thread_id);
            });
        }
    });
}
