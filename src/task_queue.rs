//! A heuristic parallel task queue.
//!
//! Each task is created with a weight; idle workers pop the heaviest
//! remaining task, so expensive work starts first. **Adding tasks** and
//! **executing tasks** are phased: all tasks must be added before the queue
//! starts executing, and adding concurrently with execution is a
//! precondition violation (panic).
//!
//! Workers are plain OS threads scoped to the run call, so tasks may borrow
//! from the caller's stack.

use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Where a task's result lands; [`TaskResult::take`] after the queue has
/// drained.
pub struct TaskResult<T> {
  slot: Arc<Mutex<Option<T>>>,
}

impl<T> TaskResult<T> {
  /// Take the result. Panics if the task has not completed, which can only
  /// happen when called before the queue ran.
  #[must_use] pub fn take(self) -> T {
    self.slot.lock().take().expect("task has not completed")
  }
}

struct Task<'a> {
  run: Box<dyn FnOnce() + Send + 'a>,
  priority: u64,
  seq: usize,
}

impl PartialEq for Task<'_> {
  fn eq(&self, other: &Self) -> bool { self.priority == other.priority && self.seq == other.seq }
}
impl Eq for Task<'_> {}
impl PartialOrd for Task<'_> {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for Task<'_> {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    // larger priority first; FIFO among equal priorities (BinaryHeap is a
    // max-heap, so later sequence numbers must compare smaller)
    self.priority.cmp(&other.priority).then(other.seq.cmp(&self.seq))
  }
}

/// The queue itself. `'env` is the lifetime of the data tasks may borrow.
pub struct TaskQueue<'env> {
  tasks: BinaryHeap<Task<'env>>,
  threads_num: usize,
  started: bool,
}

impl<'env> TaskQueue<'env> {
  /// Create a queue that will execute on `threads_num` workers; zero is
  /// promoted to one so queued tasks always have an executor.
  #[must_use] pub fn new(threads_num: usize) -> Self {
    Self { tasks: BinaryHeap::new(), threads_num: threads_num.max(1), started: false }
  }

  /// The number of workers that will be used.
  #[must_use] pub fn threads_num(&self) -> usize { self.threads_num }

  /// Add a task with the given priority; larger values run earlier. Not
  /// concurrency-safe, and a panic once execution has started.
  pub fn add_task<T: Send + 'env>(
    &mut self, priority: u64, f: impl FnOnce() -> T + Send + 'env,
  ) -> TaskResult<T> {
    assert!(!self.started, "do not add new tasks while executing");
    let slot = Arc::new(Mutex::new(None));
    let out = slot.clone();
    let seq = self.tasks.len();
    self.tasks.push(Task {
      run: Box::new(move || {
        *out.lock() = Some(f());
      }),
      priority,
      seq,
    });
    TaskResult { slot }
  }

  /// Execute every queued task and block until all have completed.
  pub fn run_and_wait(mut self) {
    if self.tasks.is_empty() { return }
    self.started = true;
    let workers = self.threads_num.min(self.tasks.len());
    let queue = Mutex::new(self.tasks);
    std::thread::scope(|scope| {
      for _ in 0..workers {
        scope.spawn(|| loop {
          // once idle, pick the task at the head of the queue
          let Some(task) = queue.lock().pop() else { return };
          (task.run)();
        });
      }
    });
  }
}

/// The default worker count for parallel passes.
#[must_use] pub fn default_threads() -> usize { num_cpus::get() }

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn runs_all_tasks_and_returns_results() {
    let mut queue = TaskQueue::new(4);
    let results: Vec<_> = (0..32u64).map(|i| queue.add_task(i, move || i * 2)).collect();
    queue.run_and_wait();
    for (i, r) in results.into_iter().enumerate() {
      assert_eq!(r.take(), i as u64 * 2);
    }
  }

  #[test]
  fn tasks_can_borrow_from_the_caller() {
    let counter = AtomicUsize::new(0);
    let mut queue = TaskQueue::new(2);
    for _ in 0..16 {
      let _ = queue.add_task(0, || { counter.fetch_add(1, Ordering::Relaxed); });
    }
    queue.run_and_wait();
    assert_eq!(counter.load(Ordering::Relaxed), 16);
  }

  #[test]
  fn single_worker_pops_heaviest_first() {
    let order = Mutex::new(vec![]);
    let mut queue = TaskQueue::new(1);
    for w in [1u64, 9, 5] {
      let order = &order;
      let _ = queue.add_task(w, move || order.lock().push(w));
    }
    queue.run_and_wait();
    assert_eq!(*order.lock(), vec![9, 5, 1]);
  }
}
