use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Allocates request ids for envelopes.
///
/// Ids start at 1, wrap back to 1 after `u32::MAX` (0 is never handed out) and
/// skip ids still held by an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct RequestIds {
    state: Arc<Mutex<IdState>>,
}

#[derive(Debug, Default)]
struct IdState {
    last: u32,
    in_flight: HashSet<u32>,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next free id until the returned lease is dropped.
    pub fn acquire(&self) -> RequestIdLease {
        let mut state = self.state.lock();
        let id = loop {
            state.last = state.last.checked_add(1).unwrap_or(1);
            let candidate = state.last;
            if state.in_flight.insert(candidate) {
                break candidate;
            }
        };
        RequestIdLease {
            id,
            state: self.state.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    #[cfg(test)]
    fn resume_after(&self, last: u32) {
        self.state.lock().last = last;
    }
}

/// An id reserved by [`RequestIds::acquire`]; released on drop.
#[derive(Debug)]
pub struct RequestIdLease {
    id: u32,
    state: Arc<Mutex<IdState>>,
}

impl RequestIdLease {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for RequestIdLease {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = RequestIds::new();
        let first = ids.acquire();
        let second = ids.acquire();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(ids.in_flight(), 2);

        drop(first);
        assert_eq!(ids.in_flight(), 1);
        assert_eq!(ids.acquire().id(), 3);
    }

    #[test]
    fn wraps_to_one_and_skips_ids_in_flight() {
        let ids = RequestIds::new();
        let one = ids.acquire();
        let two = ids.acquire();
        assert_eq!((one.id(), two.id()), (1, 2));

        ids.resume_after(u32::MAX - 1);
        let max = ids.acquire();
        assert_eq!(max.id(), u32::MAX);

        // 1 and 2 are still held, so the wrapped allocator moves past them.
        let wrapped = ids.acquire();
        assert_eq!(wrapped.id(), 3);

        drop(one);
        ids.resume_after(u32::MAX);
        assert_eq!(ids.acquire().id(), 1);
    }
}
