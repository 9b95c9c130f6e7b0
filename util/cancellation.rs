use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

/**
A `CancellationToken` lets a caller stop a long running fit, either explicitly by calling [`cancel`](#method.cancel) from another thread or implicitly by giving the token a deadline. Fits poll [`is_cancelled`](#method.is_cancelled) between units of work and return early when it is true.

The default token is never cancelled and has no deadline.
*/
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
	deadline: Option<Instant>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a token that reports itself cancelled once `deadline` has passed.
	pub fn with_deadline(deadline: Instant) -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
			deadline: Some(deadline),
		}
	}

	/// Create a token that reports itself cancelled once `timeout` has elapsed from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self::with_deadline(Instant::now() + timeout)
	}

	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		if self.cancelled.load(Ordering::Relaxed) {
			return true;
		}
		match self.deadline {
			Some(deadline) => Instant::now() >= deadline,
			None => false,
		}
	}
}

#[test]
fn test_cancel_is_visible_through_clones() {
	let token = CancellationToken::new();
	let clone = token.clone();
	assert!(!clone.is_cancelled());
	token.cancel();
	assert!(clone.is_cancelled());
}

#[test]
fn test_deadline_in_the_past_is_cancelled() {
	let token = CancellationToken::with_timeout(Duration::from_secs(0));
	assert!(token.is_cancelled());
	let token = CancellationToken::with_timeout(Duration::from_secs(3600));
	assert!(!token.is_cancelled());
}
