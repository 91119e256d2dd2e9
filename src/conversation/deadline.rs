use crate::error::ModelServiceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Call deadline plus a cancellation flag the caller can trip from elsewhere.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    expires_at: Instant,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            expires_at: started + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A child deadline that expires no later than this one and shares its
    /// cancellation flag.
    pub fn narrowed(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            expires_at: self.expires_at.min(now + timeout),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn check(&self) -> Result<(), ModelServiceError> {
        if self.is_cancelled() {
            return Err(ModelServiceError::Cancelled);
        }
        if self.remaining().is_none() {
            return Err(ModelServiceError::DeadlineExceeded {
                elapsed_ms: self.elapsed_ms(),
            });
        }
        Ok(())
    }
}
