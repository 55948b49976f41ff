use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

/// Why a frame was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// A detection is already in flight.
    Busy,
    /// The minimum interval since the last attempt has not elapsed.
    TooSoon,
}

/// Guards dispatch to the detector: at most one detection in flight, and
/// no more than one attempt per `min_interval`.
#[derive(Debug)]
pub struct CadenceGate {
    latch: Arc<AtomicBool>,
    state: Mutex<GateState>,
}

#[derive(Debug)]
struct GateState {
    min_interval: Duration,
    last_attempt: Option<Instant>,
}

/// Held for the lifetime of one detection. Dropping it frees the slot,
/// whichever way the detection ended.
#[derive(Debug)]
pub struct DetectionPermit {
    latch: Arc<AtomicBool>,
}

impl Drop for DetectionPermit {
    fn drop(&mut self) {
        self.latch.store(false, Ordering::Release);
        trace!("Detection slot released");
    }
}

impl CadenceGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            latch: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(GateState {
                min_interval,
                last_attempt: None,
            }),
        }
    }

    pub fn try_acquire(&self) -> Result<DetectionPermit, Skip> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<DetectionPermit, Skip> {
        if self
            .latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Skip::Busy);
        }
        let permit = DetectionPermit {
            latch: Arc::clone(&self.latch),
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.min_interval.is_zero() {
            if let Some(last) = state.last_attempt {
                if last + state.min_interval >= now {
                    // permit drops here, freeing the latch
                    return Err(Skip::TooSoon);
                }
            }
        }
        state.last_attempt = Some(now);

        Ok(permit)
    }

    pub fn set_min_interval(&self, min_interval: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.min_interval = min_interval;
    }

    pub fn is_busy(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_permit() {
        let gate = CadenceGate::new(Duration::ZERO);
        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert_eq!(gate.try_acquire().unwrap_err(), Skip::Busy);

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn test_min_interval_counts_from_attempt() {
        let gate = CadenceGate::new(Duration::from_millis(100));
        let start = Instant::now();

        drop(gate.try_acquire_at(start).unwrap());
        assert_eq!(
            gate.try_acquire_at(start + Duration::from_millis(50))
                .unwrap_err(),
            Skip::TooSoon
        );
        // exactly at the boundary is still too soon
        assert_eq!(
            gate.try_acquire_at(start + Duration::from_millis(100))
                .unwrap_err(),
            Skip::TooSoon
        );
        assert!(!gate.is_busy());
        assert!(gate.try_acquire_at(start + Duration::from_millis(101)).is_ok());
    }

    #[test]
    fn test_too_soon_does_not_reset_clock() {
        let gate = CadenceGate::new(Duration::from_millis(100));
        let start = Instant::now();

        drop(gate.try_acquire_at(start).unwrap());
        assert!(gate.try_acquire_at(start + Duration::from_millis(90)).is_err());
        assert!(gate.try_acquire_at(start + Duration::from_millis(110)).is_ok());
    }

    #[test]
    fn test_interval_update() {
        let gate = CadenceGate::new(Duration::from_secs(60));
        let start = Instant::now();
        drop(gate.try_acquire_at(start).unwrap());
        assert!(gate.try_acquire_at(start + Duration::from_millis(1)).is_err());

        gate.set_min_interval(Duration::ZERO);
        assert!(gate.try_acquire_at(start + Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_released_on_panic() {
        let gate = Arc::new(CadenceGate::new(Duration::ZERO));
        let permit = gate.try_acquire().unwrap();
        let res = thread::spawn(move || {
            let _permit = permit;
            panic!("detector blew up");
        })
        .join();

        assert!(res.is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_concurrent_acquire_grants_one() {
        let gate = Arc::new(CadenceGate::new(Duration::ZERO));
        let permits: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.try_acquire().ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        // returned permits stay alive, so nobody else got in
        assert_eq!(permits.len(), 1);
    }
}
