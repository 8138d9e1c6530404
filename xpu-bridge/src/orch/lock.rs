//! Per-resource-name serialization of coordinator plans. Names are hashed
//! onto a fixed set of mutexes; holding the guard for the duration of a
//! plan guarantees a single resource never has two multi-step procedures
//! interleaved at the data-plane or the hypervisor.

use futures::lock::{Mutex, MutexGuard};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

#[derive(Debug)]
pub struct ResourceLockManager {
    object_locks: Vec<Mutex<()>>,
}

impl ResourceLockManager {
    /// Lock manager with the given number of hashed lock slots.
    pub fn new(num_objects: usize) -> Self {
        let object_locks = std::iter::repeat_with(|| Mutex::new(()))
            .take(num_objects.max(1))
            .collect::<Vec<_>>();
        Self { object_locks }
    }

    /// Lock a resource by its name and obtain the guard.
    pub async fn lock_resource<T: AsRef<str>>(&self, id: T) -> MutexGuard<'_, ()> {
        // hash of the name picks the mutex slot
        let mut hasher = DefaultHasher::new();
        id.as_ref().hash(&mut hasher);
        let mutex_id = hasher.finish() as usize % self.object_locks.len();

        self.object_locks[mutex_id].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn same_name_is_mutually_exclusive() {
        let locks = Arc::new(ResourceLockManager::new(16));
        let witness = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0 .. 8 {
            let locks = locks.clone();
            let witness = witness.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock_resource("virtioBlks/blk0").await;
                let inside = witness.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(inside, 0, "two plans entered the critical section");
                tokio::time::sleep(Duration::from_millis(1)).await;
                witness.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
