//! Keyed single-flight.
//!
//! The first caller for a key runs the work; callers arriving while it runs
//! wait on the same cell and get a clone of its output. The entry is removed
//! once the work finishes, so the next caller starts fresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

pub(crate) struct FlightMap<K, V> {
  inflight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> FlightMap<K, V>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  pub fn new() -> Self {
    Self {
      inflight: Mutex::new(HashMap::new()),
    }
  }

  pub async fn run<F, Fut>(&self, key: K, work: F) -> V
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = V>,
  {
    let cell = {
      let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
      Arc::clone(
        inflight
          .entry(key.clone())
          .or_insert_with(|| Arc::new(OnceCell::new())),
      )
    };

    let output = cell.get_or_init(work).await.clone();

    // Only remove the entry this call joined; a newer flight may own the key.
    let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
    if inflight
      .get(&key)
      .is_some_and(|current| Arc::ptr_eq(current, &cell))
    {
      inflight.remove(&key);
    }

    output
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_concurrent_callers_share_one_run() {
    let flights: FlightMap<u32, usize> = FlightMap::new();
    let runs = AtomicUsize::new(0);

    let work = || async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      runs.fetch_add(1, Ordering::SeqCst) + 1
    };

    let (a, b, c) = tokio::join!(flights.run(1, work), flights.run(1, work), flights.run(1, work));

    assert_eq!((a, b, c), (1, 1, 1));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(flights.len(), 0);
  }

  #[tokio::test]
  async fn test_sequential_callers_run_again() {
    let flights: FlightMap<u32, usize> = FlightMap::new();
    let runs = AtomicUsize::new(0);
    let work = || async { runs.fetch_add(1, Ordering::SeqCst) + 1 };

    assert_eq!(flights.run(1, work).await, 1);
    assert_eq!(flights.run(1, work).await, 2);
  }

  #[tokio::test]
  async fn test_distinct_keys_do_not_share() {
    let flights: FlightMap<u32, u32> = FlightMap::new();

    let (a, b) = tokio::join!(
      flights.run(1, || async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        10
      }),
      flights.run(2, || async { 20 })
    );

    assert_eq!((a, b), (10, 20));
  }
}
