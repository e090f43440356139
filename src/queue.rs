//! Tri-state queue of I/O buffers.
//!
//! Buffers move through `ready` → `in progress` → `done` as the message
//! pump hands them to workers and collects results. All list transitions
//! happen under one lock; attached callbacks fire after it is released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::pool::{BufferPool, PoolBlock};
use crate::{Error, Result};

type AbortFn = Box<dyn FnOnce(Error) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Detached,
    Ready,
    InProgress,
    Done,
}

#[derive(Default)]
struct Lists {
    ready: VecDeque<Arc<BufferShared>>,
    inprogress: VecDeque<Arc<BufferShared>>,
    done: VecDeque<Arc<BufferShared>>,
}

impl Lists {
    fn list_mut(&mut self, state: BufferState) -> Option<&mut VecDeque<Arc<BufferShared>>> {
        match state {
            BufferState::Ready => Some(&mut self.ready),
            BufferState::InProgress => Some(&mut self.inprogress),
            BufferState::Done => Some(&mut self.done),
            BufferState::Detached => None,
        }
    }

    fn remove(&mut self, state: BufferState, buffer: &Arc<BufferShared>) {
        if let Some(list) = self.list_mut(state) {
            if let Some(index) = list.iter().position(|b| Arc::ptr_eq(b, buffer)) {
                list.remove(index);
            }
        }
    }
}

struct BufferInner {
    state: BufferState,
    code: Result<()>,
    length: usize,
    read_offset: usize,
    write_offset: usize,
    data: Option<PoolBlock>,
    callback: Option<AbortFn>,
}

struct BufferShared {
    inner: Mutex<BufferInner>,
}

impl BufferShared {
    /// Take and fire the one-shot callback, if still attached.
    fn take_callback(&self) -> Option<AbortFn> {
        self.inner.lock().unwrap().callback.take()
    }
}

struct QueueShared {
    name: String,
    pool: BufferPool,
    lists: Mutex<Lists>,
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        // Whatever is still queued aborts and goes back to the pool.
        let mut callbacks = Vec::new();
        let mut guard = self.lists.lock().unwrap();
        let lists = &mut *guard;
        for list in [&mut lists.done, &mut lists.inprogress, &mut lists.ready] {
            while let Some(buffer) = list.pop_front() {
                let mut inner = buffer.inner.lock().unwrap();
                inner.state = BufferState::Detached;
                inner.data = None;
                if let Some(cb) = inner.callback.take() {
                    callbacks.push(cb);
                }
            }
        }
        drop(guard);
        for cb in callbacks {
            cb(Error::Aborted);
        }
    }
}

/// A tri-state buffer queue with an owning buffer pool.
#[derive(Clone)]
pub struct IoQueue {
    shared: Arc<QueueShared>,
}

impl IoQueue {
    pub fn new(name: &str) -> Self {
        Self::with_pool(name, BufferPool::new(name))
    }

    pub fn with_pool(name: &str, pool: BufferPool) -> Self {
        log::debug!(target: "queue", "{}: created", name);
        Self {
            shared: Arc::new(QueueShared {
                name: name.to_owned(),
                pool,
                lists: Mutex::new(Lists::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Create a detached buffer of `length` payload bytes, optionally
    /// pre-filled with `payload` (clamped to `length`).
    pub fn create_buffer(&self, payload: Option<&[u8]>, length: usize) -> Result<IoBuffer> {
        let block = self.shared.pool.acquire(length);

        let buffer = IoBuffer {
            queue: self.shared.clone(),
            shared: Arc::new(BufferShared {
                inner: Mutex::new(BufferInner {
                    state: BufferState::Detached,
                    code: Ok(()),
                    length,
                    read_offset: 0,
                    write_offset: 0,
                    data: Some(block),
                    callback: None,
                }),
            }),
        };

        if let Some(payload) = payload {
            buffer.write(payload)?;
        }
        Ok(buffer)
    }

    pub fn has_ready(&self) -> bool {
        !self.shared.lists.lock().unwrap().ready.is_empty()
    }

    pub fn has_inprogress(&self) -> bool {
        !self.shared.lists.lock().unwrap().inprogress.is_empty()
    }

    pub fn has_done(&self) -> bool {
        !self.shared.lists.lock().unwrap().done.is_empty()
    }

    pub fn pop_ready(&self) -> Option<IoBuffer> {
        self.pop(BufferState::Ready)
    }

    pub fn pop_inprogress(&self) -> Option<IoBuffer> {
        self.pop(BufferState::InProgress)
    }

    pub fn pop_done(&self) -> Option<IoBuffer> {
        self.pop(BufferState::Done)
    }

    fn pop(&self, state: BufferState) -> Option<IoBuffer> {
        let mut lists = self.shared.lists.lock().unwrap();
        let buffer = lists.list_mut(state)?.pop_front()?;
        buffer.inner.lock().unwrap().state = BufferState::Detached;
        Some(IoBuffer {
            queue: self.shared.clone(),
            shared: buffer,
        })
    }

    /// Requeue everything in progress at the head of ready, preserving
    /// relative order. Used to retry a batch as a unit.
    pub fn rollback(&self) {
        let mut lists = self.shared.lists.lock().unwrap();
        while let Some(buffer) = lists.inprogress.pop_back() {
            buffer.inner.lock().unwrap().state = BufferState::Ready;
            lists.ready.push_front(buffer);
        }
    }

    /// Fire every attached callback with [`Error::Aborted`], leaving all
    /// buffers in their lists. Callbacks are one-shot.
    pub fn abort(&self) {
        let callbacks = {
            let lists = self.shared.lists.lock().unwrap();
            let mut callbacks = Vec::new();
            for list in [&lists.done, &lists.inprogress, &lists.ready] {
                for buffer in list {
                    if let Some(cb) = buffer.take_callback() {
                        callbacks.push(cb);
                    }
                }
            }
            callbacks
        };

        log::debug!(target: "queue", "{}: abort {} callbacks", self.shared.name, callbacks.len());
        for cb in callbacks {
            cb(Error::Aborted);
        }
    }

    /// Remove and free every queued buffer, firing attached callbacks.
    pub fn release_all(&self) {
        let (callbacks, blocks) = {
            let mut guard = self.shared.lists.lock().unwrap();
            let lists = &mut *guard;
            let mut callbacks = Vec::new();
            let mut blocks = Vec::new();
            for list in [&mut lists.done, &mut lists.inprogress, &mut lists.ready] {
                while let Some(buffer) = list.pop_front() {
                    let mut inner = buffer.inner.lock().unwrap();
                    inner.state = BufferState::Detached;
                    if let Some(cb) = inner.callback.take() {
                        callbacks.push(cb);
                    }
                    if let Some(block) = inner.data.take() {
                        blocks.push(block);
                    }
                }
            }
            (callbacks, blocks)
        };

        for cb in callbacks {
            cb(Error::Aborted);
        }
        drop(blocks);
    }
}

/// One payload-carrying node of an [`IoQueue`].
///
/// A buffer is in exactly one of the three lists, or detached while held by
/// a caller. Offsets satisfy `read_offset <= write_offset <= length`.
#[derive(Clone)]
pub struct IoBuffer {
    queue: Arc<QueueShared>,
    shared: Arc<BufferShared>,
}

impl IoBuffer {
    pub fn length(&self) -> usize {
        self.shared.inner.lock().unwrap().length
    }

    pub fn read_offset(&self) -> usize {
        self.shared.inner.lock().unwrap().read_offset
    }

    pub fn write_offset(&self) -> usize {
        self.shared.inner.lock().unwrap().write_offset
    }

    pub fn code(&self) -> Result<()> {
        self.shared.inner.lock().unwrap().code.clone()
    }

    /// Stamp the per-buffer result code the upper layer reads back.
    pub fn set_code(&self, code: Result<()>) {
        self.shared.inner.lock().unwrap().code = code;
    }

    /// Attach the one-shot callback fired on abort or release.
    pub fn on_abort(&self, callback: impl FnOnce(Error) + Send + 'static) {
        self.shared.inner.lock().unwrap().callback = Some(Box::new(callback));
    }

    /// Copy `buf` into the payload at the write offset, clamped to what
    /// fits. Zero-length writes succeed trivially.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut inner = self.shared.inner.lock().unwrap();
        let offset = inner.write_offset;
        let room = inner.length - offset;
        let count = room.min(buf.len());
        match inner.data.as_mut() {
            Some(data) => data[offset..offset + count].copy_from_slice(&buf[..count]),
            None => return Err(Error::Fault),
        }
        inner.write_offset += count;
        Ok(())
    }

    /// Copy written payload out from the read offset; returns the number of
    /// bytes copied. Zero-length reads succeed trivially.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.shared.inner.lock().unwrap();
        let offset = inner.read_offset;
        let available = inner.write_offset - offset;
        let count = available.min(buf.len());
        match inner.data.as_ref() {
            Some(data) => buf[..count].copy_from_slice(&data[offset..offset + count]),
            None => return Err(Error::Fault),
        }
        inner.read_offset += count;
        Ok(count)
    }

    pub fn set_ready(&self) {
        self.transition(BufferState::Ready);
    }

    pub fn set_inprogress(&self) {
        self.transition(BufferState::InProgress);
    }

    pub fn set_done(&self) {
        self.transition(BufferState::Done);
    }

    fn transition(&self, target: BufferState) {
        let mut lists = self.queue.lists.lock().unwrap();
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.data.is_none() {
            return;
        }
        lists.remove(inner.state, &self.shared);
        if let Some(list) = lists.list_mut(target) {
            list.push_back(self.shared.clone());
        }
        inner.state = target;
    }

    /// Detach, fire the attached callback with [`Error::Aborted`] if still
    /// set, and return the payload block to the pool.
    pub fn release(self) {
        let (callback, block) = {
            let mut lists = self.queue.lists.lock().unwrap();
            let mut inner = self.shared.inner.lock().unwrap();
            lists.remove(inner.state, &self.shared);
            inner.state = BufferState::Detached;
            (inner.callback.take(), inner.data.take())
        };

        if let Some(cb) = callback {
            cb(Error::Aborted);
        }
        drop(block);
    }
}
