//! Forwarding engine behind the relay thread.
//!
//! The relay thread only routes messages; naming, caching and face
//! bookkeeping live behind [`ForwardingEngine`]. [`ContentStore`] is the
//! in-tree engine: a bounded FIFO cache plus a prefix table.

use std::collections::VecDeque;
use std::fmt;

use crate::messaging::RadioFrame;

/// Status text returned for a successful prefix registration.
pub const PREFIX_REGISTERED: &str = "prefixreg cmd worked";

/// Forwarding counters reported by `stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub prefixes: usize,
    pub interests: u64,
    pub hits: u64,
    pub misses: u64,
    pub stored: u64,
    pub evicted: u64,
    pub frames: u64,
    pub frame_bytes: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache {}/{} entries, {} prefixes, interests {} (hit {}, miss {}), \
             stored {}, evicted {}, frames {} ({} bytes)",
            self.cache_entries,
            self.cache_capacity,
            self.prefixes,
            self.interests,
            self.hits,
            self.misses,
            self.stored,
            self.evicted,
            self.frames,
            self.frame_bytes
        )
    }
}

/// Content-centric forwarding operations used by the relay thread.
pub trait ForwardingEngine: Send {
    /// Resize the content store, evicting the oldest entries if it shrinks.
    fn configure_cache(&mut self, entries: usize);

    /// Load demo content.
    fn populate(&mut self);

    fn statistics(&self) -> EngineStats;

    /// Register `prefix` to `face`. Returns the engine's status text.
    fn register_prefix(&mut self, prefix: &str, kind: &str, face: &str) -> String;

    /// Content matching `name`, if cached.
    fn lookup(&mut self, name: &str) -> Option<Vec<u8>>;

    fn store(&mut self, name: &str, content: Vec<u8>);

    /// Frame received from the radio.
    fn on_frame(&mut self, frame: &RadioFrame);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PrefixEntry {
    prefix: String,
    kind: String,
    face: u32,
}

/// Bounded FIFO content cache with a prefix table.
pub struct ContentStore {
    capacity: usize,
    entries: VecDeque<(String, Vec<u8>)>,
    prefixes: Vec<PrefixEntry>,
    demo_name: String,
    stats: EngineStats,
}

impl ContentStore {
    /// `demo_name` is where [`ForwardingEngine::populate`] stores its document.
    pub fn new(capacity: usize, demo_name: impl Into<String>) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            prefixes: Vec::new(),
            demo_name: demo_name.into(),
            stats: EngineStats::default(),
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            if let Some((name, _)) = self.entries.pop_front() {
                log::trace!("ContentStore: evicted {}", name);
                self.stats.evicted += 1;
            }
        }
    }
}

/// Whether content published as `content_name` answers an interest for `name`.
///
/// Matching is by whole name components.
pub(crate) fn name_matches(name: &str, content_name: &str) -> bool {
    let name = name.trim_end_matches('/');
    match content_name.strip_prefix(name) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || name.is_empty(),
        None => false,
    }
}

impl ForwardingEngine for ContentStore {
    fn configure_cache(&mut self, entries: usize) {
        log::info!(
            "ContentStore: cache size {} -> {}",
            self.capacity,
            entries
        );
        self.capacity = entries;
        self.evict_to(entries);
    }

    fn populate(&mut self) {
        let name = self.demo_name.clone();
        self.store(&name, DEMO_DOCUMENT.as_bytes().to_vec());
        for (chunk, text) in DEMO_CHUNKS.iter().enumerate() {
            self.store(&format!("{}/{}", name, chunk), text.as_bytes().to_vec());
        }
        log::info!(
            "ContentStore: populated {} entries under {}",
            DEMO_CHUNKS.len() + 1,
            name
        );
    }

    fn statistics(&self) -> EngineStats {
        EngineStats {
            cache_entries: self.entries.len(),
            cache_capacity: self.capacity,
            prefixes: self.prefixes.len(),
            ..self.stats
        }
    }

    fn register_prefix(&mut self, prefix: &str, kind: &str, face: &str) -> String {
        if !prefix.starts_with('/') {
            return format!("prefixreg cmd failed: '{}' is not a name", prefix);
        }
        let face = match face.parse::<u32>() {
            Ok(face) => face,
            Err(_) => return format!("prefixreg cmd failed: bad faceid '{}'", face),
        };

        let entry = PrefixEntry {
            prefix: prefix.to_string(),
            kind: kind.to_string(),
            face,
        };
        match self.prefixes.iter_mut().find(|p| p.prefix == entry.prefix) {
            Some(existing) => *existing = entry,
            None => self.prefixes.push(entry),
        }
        log::debug!("ContentStore: prefix {} -> face {} ({})", prefix, face, kind);
        PREFIX_REGISTERED.to_string()
    }

    fn lookup(&mut self, name: &str) -> Option<Vec<u8>> {
        self.stats.interests += 1;
        let found = self
            .entries
            .iter()
            .find(|(content_name, _)| name_matches(name, content_name))
            .map(|(_, content)| content.clone());

        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            // Longest registered prefix is where the interest would go next
            if let Some(route) = self
                .prefixes
                .iter()
                .filter(|p| name_matches(&p.prefix, name))
                .max_by_key(|p| p.prefix.len())
            {
                log::debug!(
                    "ContentStore: miss for {}, route {} via face {} ({})",
                    name,
                    route.prefix,
                    route.face,
                    route.kind
                );
            }
        }
        found
    }

    fn store(&mut self, name: &str, content: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        self.entries.retain(|(existing, _)| existing != name);
        self.evict_to(self.capacity - 1);
        self.entries.push_back((name.to_string(), content));
        self.stats.stored += 1;
    }

    fn on_frame(&mut self, frame: &RadioFrame) {
        self.stats.frames += 1;
        self.stats.frame_bytes += frame.payload.len() as u64;
        log::trace!(
            "ContentStore: {} byte frame from {}",
            frame.payload.len(),
            frame.source
        );
    }
}

const DEMO_DOCUMENT: &str = "CCNx Canonical Ordering. \
Names are compared component by component. A shorter component sorts \
before a longer one; components of equal length are compared as unsigned \
bytes. A name that is a prefix of another sorts before it.";

const DEMO_CHUNKS: [&str; 3] = [
    "Components are compared first by length, shorter first.",
    "Equal-length components are compared bytewise as unsigned values.",
    "A name sorts before every name it is a proper prefix of.",
];
