use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

/**
A `ProgressCounter` tracks the progress of a task whose work may be split across multiple threads, such as the chains of a sampler. Clones share the same underlying counter, so one clone can be handed to the caller while the workers increment another.

```
use embed_util::ProgressCounter;

let progress_counter = ProgressCounter::new(4);
let handle = progress_counter.clone();
(0..4).for_each(|_| progress_counter.inc(1));
assert_eq!(handle.get(), handle.total());
```
*/
#[derive(Clone, Debug)]
pub struct ProgressCounter {
	current: Arc<AtomicU64>,
	total: u64,
}

impl ProgressCounter {
	pub fn new(total: u64) -> Self {
		Self {
			current: Arc::new(AtomicU64::new(0)),
			total,
		}
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	pub fn get(&self) -> u64 {
		self.current.load(Ordering::Relaxed)
	}

	pub fn set(&self, value: u64) {
		self.current.store(value, Ordering::Relaxed);
	}

	pub fn inc(&self, amount: u64) {
		self.current.fetch_add(amount, Ordering::Relaxed);
	}

	/// Return the fraction of the total that has been completed, in [0, 1].
	pub fn fraction(&self) -> f64 {
		if self.total == 0 {
			1.0
		} else {
			(self.get() as f64 / self.total as f64).min(1.0)
		}
	}
}

#[test]
fn test_progress_counter_is_shared_between_clones() {
	let progress_counter = ProgressCounter::new(10);
	let clone = progress_counter.clone();
	clone.inc(3);
	progress_counter.inc(2);
	assert_eq!(progress_counter.get(), 5);
	assert!((clone.fraction() - 0.5).abs() < 1e-12);
	clone.set(20);
	assert!((progress_counter.fraction() - 1.0).abs() < 1e-12);
}
