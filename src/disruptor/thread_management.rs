//! Named, optionally pinned participant threads
//!
//! Spin waiting only pays off when each participant owns a core, so the demo
//! and the benchmarks place producers and consumers through [`ThreadContext`].

use core_affinity::CoreId;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Name and core placement for a participant thread
#[derive(Debug, Clone, Default)]
pub struct ThreadContext {
    affinity: Option<CoreId>,
    name: Option<String>,
}

impl ThreadContext {
    /// Create a context with no name and no pinning
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the thread to `core_id`
    ///
    /// Unknown cores are not an error: the thread runs unpinned and a warning
    /// is logged when it starts.
    pub fn pin_at_core(mut self, core_id: usize) -> Self {
        self.affinity = Some(CoreId { id: core_id });
        self
    }

    /// Set the thread name
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The configured name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The configured core, if any
    pub fn core(&self) -> Option<usize> {
        self.affinity.map(|core| core.id)
    }

    /// Spawn `f` with this context's name and placement
    ///
    /// # Errors
    /// Whatever the OS reports when the thread cannot be created.
    pub fn spawn<F, T>(self, f: F) -> std::io::Result<ManagedThread<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let thread_name = self.name.unwrap_or_else(|| "participant".to_owned());
        let affinity = self.affinity;
        let name_in_thread = thread_name.clone();

        let join_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                set_affinity_if_defined(affinity, &name_in_thread);
                f()
            })?;

        Ok(ManagedThread {
            join_handle: Some(join_handle),
            thread_name,
        })
    }
}

/// A spawned participant thread
///
/// Dropping it joins the thread.
#[derive(Debug)]
pub struct ManagedThread<T = ()> {
    join_handle: Option<JoinHandle<T>>,
    thread_name: String,
}

impl<T> ManagedThread<T> {
    /// The thread's name
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Wait for the thread and return what it produced
    ///
    /// # Errors
    /// The panic payload if the thread panicked.
    pub fn join(mut self) -> thread::Result<T> {
        match self.join_handle.take() {
            Some(handle) => handle.join(),
            None => Err(Box::new("thread already joined")),
        }
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<T> Drop for ManagedThread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn set_affinity_if_defined(affinity: Option<CoreId>, thread_name: &str) {
    let Some(core_id) = affinity else {
        return;
    };
    if core_affinity::set_for_current(core_id) {
        debug!(thread = thread_name, core = core_id.id, "pinned thread");
    } else {
        warn!(
            thread = thread_name,
            core = core_id.id,
            available = ?available_cores(),
            "could not pin thread"
        );
    }
}

/// Ids of the cores this process may run on
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .iter()
        .map(|core| core.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_thread_context_configuration() {
        let context = ThreadContext::new().pin_at_core(0).thread_name("writer");
        assert_eq!(context.core(), Some(0));
        assert_eq!(context.name(), Some("writer"));
        assert_eq!(ThreadContext::new().name(), None);
    }

    #[test]
    fn test_spawn_returns_value() {
        let barrier = Arc::new(Barrier::new(2));
        let in_thread = barrier.clone();

        let managed = ThreadContext::new()
            .thread_name("reader-0")
            .spawn(move || {
                in_thread.wait();
                thread::current().name().map(str::to_owned)
            })
            .unwrap();

        assert_eq!(managed.thread_name(), "reader-0");
        assert!(managed.is_running());
        barrier.wait();
        assert_eq!(managed.join().unwrap().as_deref(), Some("reader-0"));
    }

    #[test]
    fn test_default_name() {
        let managed = ThreadContext::new().spawn(|| 7).unwrap();
        assert_eq!(managed.thread_name(), "participant");
        assert_eq!(managed.join().unwrap(), 7);
    }

    #[test]
    #[cfg(not(miri))]
    fn test_pinned_thread_runs() {
        let cores = available_cores();
        assert!(!cores.is_empty());
        let managed = ThreadContext::new()
            .pin_at_core(cores[0])
            .spawn(|| 1 + 1)
            .unwrap();
        assert_eq!(managed.join().unwrap(), 2);
    }

    #[test]
    fn test_unknown_core_still_runs() {
        let managed = ThreadContext::new()
            .pin_at_core(usize::MAX)
            .spawn(|| "ran")
            .unwrap();
        assert_eq!(managed.join().unwrap(), "ran");
    }
}
