use crate::storage::error::{StorageError, StorageResult};
use std::collections::HashMap;
use std::hash::Hash;

pub type FrameId = usize;

#[derive(Debug)]
struct Frame<K, V> {
    key: K,
    value: V,
    /// Neighbour towards the most recently used end.
    prev: Option<FrameId>,
    /// Neighbour towards the least recently used end.
    next: Option<FrameId>,
}

/// Bounded cache ordered by recency of access.
///
/// Entries live in a fixed arena of frames. The recency list is threaded
/// through the frames by index, so every cached key sits at exactly one
/// position in the list.
#[derive(Debug)]
pub struct LruCache<K, V> {
    frames: Vec<Option<Frame<K, V>>>,
    free_frames: Vec<FrameId>,
    index: HashMap<K, FrameId>,
    /// Most recently used frame.
    head: Option<FrameId>,
    /// Least recently used frame.
    tail: Option<FrameId>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            free_frames: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let frame_id = *self.index.get(key)?;
        self.unlink(frame_id);
        self.push_front(frame_id);
        self.frames[frame_id].as_ref().map(|f| &f.value)
    }

    /// Look up `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let frame_id = *self.index.get(key)?;
        self.frames[frame_id].as_ref().map(|f| &f.value)
    }

    /// Insert `value` as the most recently used entry.
    ///
    /// When the cache is full, the least recently used entry for which
    /// `evictable` holds is removed and returned. If no entry qualifies,
    /// nothing is changed and `BufferPoolFull` is returned.
    pub fn put<F>(&mut self, key: K, value: V, evictable: F) -> StorageResult<Option<(K, V)>>
    where
        F: Fn(&K, &V) -> bool,
    {
        if let Some(&frame_id) = self.index.get(&key) {
            if let Some(frame) = self.frames[frame_id].as_mut() {
                frame.value = value;
            }
            self.unlink(frame_id);
            self.push_front(frame_id);
            return Ok(None);
        }

        let evicted = if self.index.len() >= self.capacity {
            let victim = self
                .find_victim(&evictable)
                .ok_or(StorageError::BufferPoolFull {
                    capacity: self.capacity,
                })?;
            self.remove_frame(victim)
        } else {
            None
        };

        let frame = Frame {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let frame_id = match self.free_frames.pop() {
            Some(id) => {
                self.frames[id] = Some(frame);
                id
            }
            None => {
                self.frames.push(Some(frame));
                self.frames.len() - 1
            }
        };
        self.index.insert(key, frame_id);
        self.push_front(frame_id);

        Ok(evicted)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let frame_id = *self.index.get(key)?;
        self.remove_frame(frame_id).map(|(_, v)| v)
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
        }
    }

    fn find_victim<F>(&self, evictable: &F) -> Option<FrameId>
    where
        F: Fn(&K, &V) -> bool,
    {
        let mut cursor = self.tail;
        while let Some(frame_id) = cursor {
            let frame = self.frames[frame_id].as_ref()?;
            if evictable(&frame.key, &frame.value) {
                return Some(frame_id);
            }
            cursor = frame.prev;
        }
        None
    }

    fn remove_frame(&mut self, frame_id: FrameId) -> Option<(K, V)> {
        self.unlink(frame_id);
        let frame = self.frames[frame_id].take()?;
        self.index.remove(&frame.key);
        self.free_frames.push(frame_id);
        Some((frame.key, frame.value))
    }

    fn unlink(&mut self, frame_id: FrameId) {
        let (prev, next) = match self.frames[frame_id].as_mut() {
            Some(frame) => (frame.prev.take(), frame.next.take()),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(frame) = self.frames[p].as_mut() {
                    frame.next = next;
                }
            }
            None => {
                if self.head == Some(frame_id) {
                    self.head = next;
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(frame) = self.frames[n].as_mut() {
                    frame.prev = prev;
                }
            }
            None => {
                if self.tail == Some(frame_id) {
                    self.tail = prev;
                }
            }
        }
    }

    fn push_front(&mut self, frame_id: FrameId) {
        let old_head = self.head;
        if let Some(frame) = self.frames[frame_id].as_mut() {
            frame.prev = None;
            frame.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(frame) = self.frames[h].as_mut() {
                frame.prev = Some(frame_id);
            }
        }
        self.head = Some(frame_id);
        if self.tail.is_none() {
            self.tail = Some(frame_id);
        }
    }
}

pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: Option<FrameId>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.cache.frames[self.cursor?].as_ref()?;
        self.cursor = frame.next;
        Some((&frame.key, &frame.value))
    }
}
