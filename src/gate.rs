//! Read/Write Gate
//!
//! Every children object built on the same [`Gate`] shares one read/write
//! discipline:
//!
//! - **Read access** is shared and reentrant. Any number of threads may read at
//!   once and a reader may nest further read sections freely.
//! - **Write access** is exclusive. Writes are submitted as tasks into one FIFO
//!   queue and executed strictly in submission order by a single executor at a
//!   time, so every notification fired by a task sees the complete result of
//!   all earlier tasks and none of the later ones.
//!
//! ```text
//!   post_write(t1) ─┐
//!   post_write(t2) ─┼──▶ [ t1 | t2 | t3 ] ──▶ executor ──▶ RwLock::write ──▶ run
//!   post_write(t3) ─┘            FIFO          (one thread at a time)
//! ```
//!
//! # Who Executes
//!
//! There is no background thread. A thread posting a task outside any access
//! section becomes the executor and drains the queue before returning, which
//! keeps the common single-threaded case synchronous. A task posted while the
//! caller holds read or write access is queued and runs as soon as the
//! outermost section on that thread ends. A task posted while another thread
//! is executing is picked up by that executor.
//!
//! # Lock Ordering Guard
//!
//! In debug builds write submission consults the registered
//! [`ForeignLock`]s and fails with [`ChildrenError::ForeignLockHeld`] if the
//! current thread holds one of them. In release builds the check compiles
//! away.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use tracing::{error, trace};

use crate::error::ChildrenError;

/// A unit of work executed under exclusive write access.
pub type WriteTask = Box<dyn FnOnce() + Send + 'static>;

/// A lock owned by another subsystem that must never be held while entering
/// the gate for writing.
pub trait ForeignLock: Send + Sync {
    /// Name used in the error message.
    fn name(&self) -> &'static str;

    /// Whether the calling thread currently holds the lock.
    fn held_by_current_thread(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
struct Access {
    reads: u32,
    writes: u32,
}

thread_local! {
    static ACCESS: RefCell<Vec<(u64, Access)>> = const { RefCell::new(Vec::new()) };
}

fn with_access<R>(gate: u64, f: impl FnOnce(&mut Access) -> R) -> R {
    ACCESS.with(|cell| {
        let mut held = cell.borrow_mut();
        let pos = match held.iter().position(|(id, _)| *id == gate) {
            Some(pos) => pos,
            None => {
                held.push((gate, Access::default()));
                held.len() - 1
            }
        };
        let result = f(&mut held[pos].1);
        if held[pos].1.reads == 0 && held[pos].1.writes == 0 {
            held.swap_remove(pos);
        }
        result
    })
}

fn current_access(gate: u64) -> Access {
    ACCESS.with(|cell| {
        cell.borrow()
            .iter()
            .find(|(id, _)| *id == gate)
            .map(|(_, a)| *a)
            .unwrap_or_default()
    })
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<WriteTask>,
    executing: bool,
}

/// Reentrant read/write gate with a serialized write queue.
pub struct Gate {
    id: u64,
    lock: RwLock<()>,
    queue: Mutex<Queue>,
    idle: Condvar,
    foreign: Mutex<Vec<Arc<dyn ForeignLock>>>,
}

impl Gate {
    /// Creates a new gate.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Gate {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            lock: RwLock::new(()),
            queue: Mutex::new(Queue::default()),
            idle: Condvar::new(),
            foreign: Mutex::new(Vec::new()),
        }
    }

    /// Registers a lock that must not be held while submitting writes.
    pub fn register_foreign_lock(&self, lock: Arc<dyn ForeignLock>) {
        self.foreign.lock().push(lock);
    }

    /// Whether the current thread is inside read or write access.
    pub fn is_read_access(&self) -> bool {
        let access = current_access(self.id);
        access.reads > 0 || access.writes > 0
    }

    /// Whether the current thread is inside write access.
    pub fn is_write_access(&self) -> bool {
        current_access(self.id).writes > 0
    }

    /// Runs `f` with shared read access.
    ///
    /// Nested calls on the same thread do not block, even when a writer is
    /// waiting. Inside write access `f` simply runs.
    pub fn read_access<R>(&self, f: impl FnOnce() -> R) -> R {
        let _access = self.enter_read();
        f()
    }

    fn enter_read(&self) -> ReadAccess<'_> {
        if self.is_write_access() {
            with_access(self.id, |a| a.reads += 1);
            return ReadAccess {
                gate: self,
                guard: None,
            };
        }
        let guard = self.lock.read_recursive();
        with_access(self.id, |a| a.reads += 1);
        ReadAccess {
            gate: self,
            guard: Some(guard),
        }
    }

    /// Runs `f` with exclusive write access and returns its result.
    ///
    /// Tasks queued before this call run first. Fails when called from inside
    /// read access on the same thread, since that could never be granted.
    pub fn write_access<R>(&self, f: impl FnOnce() -> R) -> Result<R, ChildrenError> {
        self.check_foreign_locks()?;
        let access = current_access(self.id);
        if access.writes > 0 {
            return Ok(f());
        }
        if access.reads > 0 {
            return Err(ChildrenError::WriteInsideRead);
        }

        {
            let mut queue = self.queue.lock();
            while queue.executing {
                self.idle.wait(&mut queue);
            }
            queue.executing = true;
        }
        self.run_pending(false);

        let result = {
            let _w = self.lock.write();
            with_access(self.id, |a| a.writes += 1);
            let _exit = WriteExit { gate: self.id };
            f()
        };

        self.run_pending(true);
        Ok(result)
    }

    /// Queues `task` for exclusive execution.
    ///
    /// Returns once the task has run when the calling thread became the
    /// executor, otherwise as soon as the task is queued.
    pub fn post_write(&self, task: WriteTask) -> Result<(), ChildrenError> {
        self.check_foreign_locks()?;
        let mut queue = self.queue.lock();
        queue.tasks.push_back(task);
        if queue.executing || self.is_read_access() {
            trace!(gate = self.id, pending = queue.tasks.len(), "write task queued");
            return Ok(());
        }
        queue.executing = true;
        drop(queue);
        self.run_pending(true);
        Ok(())
    }

    /// Blocks until the write queue is empty and no task is running.
    ///
    /// Pending tasks are executed by the calling thread if nobody else is
    /// executing. Returns immediately inside an access section, where waiting
    /// could never finish.
    pub fn flush(&self) {
        if self.is_read_access() {
            return;
        }
        let mut queue = self.queue.lock();
        loop {
            if !queue.executing {
                if queue.tasks.is_empty() {
                    return;
                }
                queue.executing = true;
                drop(queue);
                self.run_pending(true);
                queue = self.queue.lock();
                continue;
            }
            self.idle.wait(&mut queue);
        }
    }

    /// Number of queued tasks that have not started yet.
    pub fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Executes queued tasks until the queue is empty. The caller must own the
    /// executor role; it is released only when `release` is set.
    fn run_pending(&self, release: bool) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        if release {
                            queue.executing = false;
                            self.idle.notify_all();
                        }
                        return;
                    }
                }
            };
            let _w = self.lock.write();
            with_access(self.id, |a| a.writes += 1);
            let _exit = WriteExit { gate: self.id };
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(gate = self.id, "write task panicked; continuing with the next one");
            }
        }
    }

    /// Called when the outermost read section of this thread ends.
    fn after_read(&self) {
        let mut queue = self.queue.lock();
        if queue.executing || queue.tasks.is_empty() {
            return;
        }
        queue.executing = true;
        drop(queue);
        self.run_pending(true);
    }

    #[cfg(debug_assertions)]
    fn check_foreign_locks(&self) -> Result<(), ChildrenError> {
        for lock in self.foreign.lock().iter() {
            if lock.held_by_current_thread() {
                return Err(ChildrenError::ForeignLockHeld { lock: lock.name() });
            }
        }
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    fn check_foreign_locks(&self) -> Result<(), ChildrenError> {
        Ok(())
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish()
    }
}

struct ReadAccess<'a> {
    gate: &'a Gate,
    guard: Option<RwLockReadGuard<'a, ()>>,
}

impl Drop for ReadAccess<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let access = with_access(self.gate.id, |a| {
            a.reads -= 1;
            *a
        });
        if access.reads == 0 && access.writes == 0 && !std::thread::panicking() {
            self.gate.after_read();
        }
    }
}

struct WriteExit {
    gate: u64,
}

impl Drop for WriteExit {
    fn drop(&mut self) {
        with_access(self.gate, |a| a.writes -= 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_post_write_runs_inline_when_idle() {
        let gate = Gate::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        gate.post_write(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_post_write_inside_read_is_deferred() {
        let gate = Arc::new(Gate::new());
        let ran = Arc::new(AtomicBool::new(false));
        gate.read_access(|| {
            let flag = Arc::clone(&ran);
            gate.post_write(Box::new(move || flag.store(true, Ordering::SeqCst)))
                .unwrap();
            assert!(!ran.load(Ordering::SeqCst));
            assert_eq!(gate.pending(), 1);
        });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_tasks_run_in_submission_order() {
        let gate = Arc::new(Gate::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        gate.read_access(|| {
            for i in 0..5 {
                let log = Arc::clone(&log);
                gate.post_write(Box::new(move || log.lock().push(i))).unwrap();
            }
        });
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_task_posted_from_task_runs_after_it() {
        let gate = Arc::new(Gate::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_gate = Arc::clone(&gate);
        let inner_log = Arc::clone(&log);
        gate.post_write(Box::new(move || {
            let nested_log = Arc::clone(&inner_log);
            inner_gate
                .post_write(Box::new(move || nested_log.lock().push("nested")))
                .unwrap();
            inner_log.lock().push("outer");
        }))
        .unwrap();
        assert_eq!(*log.lock(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_read_access_is_reentrant() {
        let gate = Gate::new();
        let depth = gate.read_access(|| gate.read_access(|| gate.read_access(|| 3)));
        assert_eq!(depth, 3);
        assert!(!gate.is_read_access());
    }

    #[test]
    fn test_access_flags() {
        let gate = Gate::new();
        assert!(!gate.is_read_access());
        gate.read_access(|| {
            assert!(gate.is_read_access());
            assert!(!gate.is_write_access());
        });
        gate.write_access(|| {
            assert!(gate.is_write_access());
            assert!(gate.is_read_access());
            gate.read_access(|| assert!(gate.is_write_access()));
        })
        .unwrap();
        assert!(!gate.is_write_access());
    }

    #[test]
    fn test_write_inside_read_is_rejected() {
        let gate = Gate::new();
        let result = gate.read_access(|| gate.write_access(|| ()));
        assert!(matches!(result, Err(ChildrenError::WriteInsideRead)));
    }

    #[test]
    fn test_panicking_task_does_not_poison_queue() {
        let gate = Gate::new();
        gate.post_write(Box::new(|| panic!("boom"))).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        gate.post_write(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(!gate.is_write_access());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let gate = Arc::new(Gate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let writer_gate = Arc::clone(&gate);
        let writer_inside = Arc::clone(&inside);
        let writer = thread::spawn(move || {
            writer_gate
                .write_access(|| {
                    writer_inside.store(1, Ordering::SeqCst);
                    tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    writer_inside.store(0, Ordering::SeqCst);
                })
                .unwrap();
        });

        rx.recv().unwrap();
        let seen = gate.read_access(|| inside.load(Ordering::SeqCst));
        assert_eq!(seen, 0);
        writer.join().unwrap();
    }

    #[test]
    fn test_flush_waits_for_other_executor() {
        let gate = Arc::new(Gate::new());
        let done = Arc::new(AtomicBool::new(false));
        let worker_gate = Arc::clone(&gate);
        let worker_done = Arc::clone(&done);
        let worker = thread::spawn(move || {
            worker_gate
                .post_write(Box::new(move || {
                    thread::sleep(Duration::from_millis(30));
                    worker_done.store(true, Ordering::SeqCst);
                }))
                .unwrap();
        });
        thread::sleep(Duration::from_millis(5));
        gate.flush();
        worker.join().unwrap();
        gate.flush();
        assert!(done.load(Ordering::SeqCst));
    }

    struct Flag(AtomicBool);

    impl ForeignLock for Flag {
        fn name(&self) -> &'static str {
            "project lock"
        }

        fn held_by_current_thread(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_foreign_lock_rejects_write_submission() {
        let gate = Gate::new();
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        gate.register_foreign_lock(flag.clone());
        let err = gate.post_write(Box::new(|| ())).unwrap_err();
        assert!(matches!(err, ChildrenError::ForeignLockHeld { lock: "project lock" }));

        flag.0.store(false, Ordering::SeqCst);
        assert!(gate.post_write(Box::new(|| ())).is_ok());
    }
}
