use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

pub const DEFAULT_MAX_IDLE_PER_KEY: usize = 16;

/// A keyed, bounded pool of expensive-to-construct objects.
///
/// `get` hands out a [`Recycled`] guard; when the guard drops, the object
/// is passed to the pool's recycler and shelved for reuse under its key if
/// the per-key cap allows, otherwise dropped. Intended to be held in a
/// process-wide `Lazy` static so short-lived streams share contexts.
pub struct RecyclingPool<T, K = ()>
where
    K: Eq + Hash + Clone,
{
    idle: Mutex<HashMap<K, Vec<T>>>,
    max_idle_per_key: usize,
    recycler: fn(&mut T) -> bool,
}

impl<T, K> RecyclingPool<T, K>
where
    K: Eq + Hash + Clone,
{
    /// `recycler` resets an object before it is shelved; returning `false`
    /// discards the object instead.
    pub fn new(max_idle_per_key: usize, recycler: fn(&mut T) -> bool) -> Self {
        RecyclingPool {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_key,
            recycler,
        }
    }

    /// Takes an idle object for `key` or constructs one with `factory`.
    pub fn get<F>(&self, key: K, factory: F) -> Recycled<'_, T, K>
    where
        F: FnOnce() -> T,
    {
        let recycled = self
            .idle
            .lock()
            .expect("recycling pool poisoned")
            .get_mut(&key)
            .and_then(Vec::pop);
        let value = match recycled {
            Some(value) => value,
            None => {
                log::debug!("recycling pool miss, constructing a new object");
                factory()
            }
        };
        Recycled {
            value: Some(value),
            pool: self,
            key,
        }
    }

    fn put(&self, key: K, mut value: T) {
        if !(self.recycler)(&mut value) {
            return;
        }
        let mut idle = self.idle.lock().expect("recycling pool poisoned");
        let shelf = idle.entry(key).or_default();
        if shelf.len() < self.max_idle_per_key {
            shelf.push(value);
        }
    }

    #[cfg(test)]
    fn idle_count(&self, key: &K) -> usize {
        self.idle
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |shelf| shelf.len())
    }
}

/// Owning handle to a pooled object. Dereferences to `T`; returns the
/// object to its pool on drop.
pub struct Recycled<'pool, T, K = ()>
where
    K: Eq + Hash + Clone,
{
    value: Option<T>,
    pool: &'pool RecyclingPool<T, K>,
    key: K,
}

impl<T, K> Deref for Recycled<'_, T, K>
where
    K: Eq + Hash + Clone,
{
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("recycled value already taken")
    }
}

impl<T, K> DerefMut for Recycled<'_, T, K>
where
    K: Eq + Hash + Clone,
{
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("recycled value already taken")
    }
}

impl<T, K> Drop for Recycled<'_, T, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put(self.key.clone(), value);
        }
    }
}
