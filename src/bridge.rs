//! Background disk loading for a single-threaded caller.
//!
//! A [`DiskBridge`] owns one named worker thread. The caller's thread asks for
//! images and gets a [`RequestHandle`] back immediately; the worker resolves
//! the path, checks the file and decodes it, then posts the result back over
//! a channel. Nothing is delivered until the caller pumps the bridge with
//! [`dispatch`](DiskBridge::dispatch), so callbacks always run on the
//! caller's thread.
//!
//! ```text
//! caller thread                          worker thread
//! ─────────────                          ─────────────
//! request() ─▶ handle (Pending)
//!           ─▶ DiskTask ──── tasks ────▶ check file ─▶ decode_for_display
//! dispatch() ◀──────────── results ──── (id, image | LoadError)
//!   └─▶ handle Resolved/Failed, callback
//! ```
//!
//! The bridge and its handles are `!Send`: they can only ever be used on
//! the thread that created them.
//!
//! ```compile_fail
//! use chan_image::bridge::DiskBridge;
//! fn assert_send<T: Send>() {}
//! assert_send::<DiskBridge>();
//! ```
//!
//! Tasks run strictly in submission order. Cancelling a handle suppresses
//! its callback; a decode already running on the worker still finishes.
//! A panicking decoder fails only its own request with [`LoadError::Decode`].
//! Dropping the bridge waits for queued work; [`DiskBridge::detach`] does not.

use crate::imaging::{ImageBackend, SizeHint};
use crate::resolve::{
    ImageReference, OwnerContext, OwnerDirs, ResolveError, ResolvedName, StorageLocation,
    resolve_filename,
};
use crate::sniff::Accessibility;
use image::DynamicImage;
use serde::Serialize;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

const WORKER_THREAD_NAME: &str = "disk-bridge";

/// Longest single wait before checking whether the worker is still alive.
const WORKER_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("Could not load image from the disk: (path = {}, {checks})", path.display())]
    Inaccessible {
        path: PathBuf,
        checks: Accessibility,
    },
    #[error("Could not decode image {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("Disk worker is not running, request could not be started")]
    ResultConstruction,
    #[error("No network loader configured for {url}")]
    NetworkUnavailable { url: String },
    #[error("Network load failed: {0}")]
    Network(String),
}

/// Lifecycle of a request. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Resolved,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        self != RequestState::Pending
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Pending => "pending",
            RequestState::Resolved => "resolved",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The mutable side of a request, shared by its handles.
#[derive(Debug)]
pub struct PendingResult {
    image: Option<Rc<DynamicImage>>,
    resolved_path: Option<PathBuf>,
    state: RequestState,
}

impl PendingResult {
    fn new() -> Self {
        Self {
            image: None,
            resolved_path: None,
            state: RequestState::Pending,
        }
    }

    /// Move to `next` if still pending. Returns whether the move happened.
    fn transition(&mut self, next: RequestState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }
}

/// Caller-side handle to one outstanding image request.
///
/// Cheap to clone; clones observe the same request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    inner: Rc<RefCell<PendingResult>>,
}

impl RequestHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            inner: Rc::new(RefCell::new(PendingResult::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.inner.borrow().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RequestState::Cancelled
    }

    /// The decoded image, once resolved.
    pub fn image(&self) -> Option<Rc<DynamicImage>> {
        self.inner.borrow().image.clone()
    }

    /// The file the image was read from. `None` for network loads.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.inner.borrow().resolved_path.clone()
    }

    fn cancel(&self) -> bool {
        self.inner.borrow_mut().transition(RequestState::Cancelled)
    }
}

/// A successfully loaded image, as it crosses back from the loader.
#[derive(Debug)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub path: Option<PathBuf>,
}

pub type ResultCallback = Box<dyn FnOnce(Result<&RequestHandle, LoadError>)>;

/// The right to finish one request: its handle plus the callback.
///
/// Network loaders receive one per request and call
/// [`complete`](Self::complete) on the caller's thread when done.
pub struct Completer {
    handle: RequestHandle,
    callback: ResultCallback,
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Completer {
    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    /// Record the outcome and invoke the callback. A cancelled (or already
    /// finished) handle swallows the result; returns whether the callback ran.
    pub fn complete(self, result: Result<LoadedImage, LoadError>) -> bool {
        let Completer { handle, callback } = self;
        let delivered = {
            let mut pending = handle.inner.borrow_mut();
            match &result {
                Ok(_) => pending.transition(RequestState::Resolved),
                Err(_) => pending.transition(RequestState::Failed),
            }
        };
        if !delivered {
            trace!(id = handle.id, state = %handle.state(), "Dropping result for finished request");
            return false;
        }

        match result {
            Ok(loaded) => {
                {
                    let mut pending = handle.inner.borrow_mut();
                    pending.image = Some(Rc::new(loaded.image));
                    pending.resolved_path = loaded.path;
                }
                callback(Ok(&handle));
            }
            Err(e) => callback(Err(e)),
        }
        true
    }
}

/// Remote image retrieval, supplied by the embedding application.
///
/// Called on the caller's thread. Implementations must eventually hand the
/// [`Completer`] a result on that same thread, or drop it.
pub trait NetworkImageLoader {
    fn fetch(&self, url: &str, hint: SizeHint, completer: Completer);
}

/// One unit of disk work. Plain data so it can cross to the worker.
#[derive(Debug)]
struct DiskTask {
    id: u64,
    owner: OwnerDirs,
    name: ResolvedName,
    hint: SizeHint,
}

#[derive(Debug)]
struct WorkerResult {
    id: u64,
    result: Result<LoadedImage, LoadError>,
}

/// Loads images from disk on a dedicated worker thread.
pub struct DiskBridge {
    save_root: PathBuf,
    task_tx: Option<Sender<DiskTask>>,
    result_tx: Sender<WorkerResult>,
    result_rx: Receiver<WorkerResult>,
    worker: Option<JoinHandle<()>>,
    pending: RefCell<HashMap<u64, Completer>>,
    next_id: Cell<u64>,
    network: Option<Box<dyn NetworkImageLoader>>,
}

impl fmt::Debug for DiskBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskBridge")
            .field("save_root", &self.save_root)
            .field("pending", &self.pending.borrow().len())
            .finish_non_exhaustive()
    }
}

impl DiskBridge {
    /// Start a bridge reading from under `save_root`.
    ///
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new(save_root: impl Into<PathBuf>, backend: Arc<dyn ImageBackend>) -> std::io::Result<Self> {
        let save_root = save_root.into();
        let (task_tx, task_rx) = mpsc::channel::<DiskTask>();
        let (result_tx, result_rx) = mpsc::channel::<WorkerResult>();

        let worker = {
            let save_root = save_root.clone();
            let result_tx = result_tx.clone();
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || run_worker(&save_root, backend.as_ref(), task_rx, result_tx))?
        };
        debug!(save_root = %save_root.display(), "Started disk bridge");

        Ok(Self {
            save_root,
            task_tx: Some(task_tx),
            result_tx,
            result_rx,
            worker: Some(worker),
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            network: None,
        })
    }

    /// Route non-local requests through `loader`.
    pub fn with_network(mut self, loader: Box<dyn NetworkImageLoader>) -> Self {
        self.network = Some(loader);
        self
    }

    pub fn save_root(&self) -> &Path {
        &self.save_root
    }

    /// Disk and queued requests whose results have not been dispatched yet.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    fn new_completer(&self, on_result: ResultCallback) -> Completer {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Completer {
            handle: RequestHandle::new(id),
            callback: on_result,
        }
    }

    /// Park `completer` and have `result` delivered on the next dispatch.
    fn fail_later(&self, completer: Completer, error: LoadError) -> RequestHandle {
        let handle = completer.handle.clone();
        self.pending.borrow_mut().insert(handle.id, completer);
        // result_rx lives as long as self, so this send cannot fail
        let _ = self.result_tx.send(WorkerResult {
            id: handle.id,
            result: Err(error),
        });
        handle
    }

    /// Load the image `reference` points at.
    ///
    /// The filename is resolved here, so a thumbnail without a derivable
    /// extension fails immediately, before any disk access.
    pub fn request(
        &self,
        reference: &ImageReference,
        width: u32,
        height: u32,
        on_result: impl FnOnce(Result<&RequestHandle, LoadError>) + 'static,
    ) -> Result<RequestHandle, ResolveError> {
        let name = resolve_filename(reference)?;
        Ok(self.enqueue(
            reference.owner.clone(),
            name,
            SizeHint::new(width, height),
            Box::new(on_result),
        ))
    }

    /// Load an already formatted `filename` of `owner`. Spoilers are read
    /// from the board directory, everything else from the images directory.
    pub fn request_file(
        &self,
        owner: &dyn OwnerContext,
        filename: impl Into<String>,
        is_spoiler: bool,
        width: u32,
        height: u32,
        on_result: impl FnOnce(Result<&RequestHandle, LoadError>) + 'static,
    ) -> RequestHandle {
        let name = ResolvedName {
            filename: filename.into(),
            location: StorageLocation::for_spoiler(is_spoiler),
        };
        self.enqueue(
            owner.dirs(),
            name,
            SizeHint::new(width, height),
            Box::new(on_result),
        )
    }

    fn enqueue(
        &self,
        owner: OwnerDirs,
        name: ResolvedName,
        hint: SizeHint,
        on_result: ResultCallback,
    ) -> RequestHandle {
        let completer = self.new_completer(on_result);
        let handle = completer.handle.clone();
        let task = DiskTask {
            id: handle.id,
            owner,
            name,
            hint,
        };
        trace!(id = task.id, filename = %task.name.filename, location = %task.name.location, "Queueing disk load");

        let sent = match &self.task_tx {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if !sent {
            warn!(id = handle.id, "Disk worker gone, failing request");
            return self.fail_later(completer, LoadError::ResultConstruction);
        }
        self.pending.borrow_mut().insert(handle.id, completer);
        handle
    }

    /// Load a post image: from disk for locally saved owners, otherwise the
    /// thumbnail URL goes to the network loader.
    pub fn get_image(
        &self,
        is_thumbnail: bool,
        reference: &ImageReference,
        width: u32,
        height: u32,
        on_result: impl FnOnce(Result<&RequestHandle, LoadError>) + 'static,
    ) -> Result<RequestHandle, ResolveError> {
        if reference.owner.is_local {
            let mut reference = reference.clone();
            reference.is_thumbnail = is_thumbnail;
            return self.request(&reference, width, height, on_result);
        }

        let url = reference
            .thumbnail_url
            .as_deref()
            .ok_or(ResolveError::MissingUrl)?;
        Ok(self.get_url(url, width, height, on_result))
    }

    /// Fetch `url` through the network loader. Without one, the request
    /// fails with [`LoadError::NetworkUnavailable`] on the next dispatch.
    pub fn get_url(
        &self,
        url: &str,
        width: u32,
        height: u32,
        on_result: impl FnOnce(Result<&RequestHandle, LoadError>) + 'static,
    ) -> RequestHandle {
        let completer = self.new_completer(Box::new(on_result));
        match &self.network {
            Some(loader) => {
                let handle = completer.handle.clone();
                debug!(id = handle.id, url, "Passing request to network loader");
                loader.fetch(url, SizeHint::new(width, height), completer);
                handle
            }
            None => self.fail_later(
                completer,
                LoadError::NetworkUnavailable {
                    url: url.to_string(),
                },
            ),
        }
    }

    /// Cancel `handle`. Its callback will not run; disk work already started
    /// for it is not interrupted. No effect on a finished request.
    pub fn cancel(&self, handle: &RequestHandle) {
        if handle.cancel() {
            debug!(id = handle.id, "Cancelled request");
        }
        self.pending.borrow_mut().remove(&handle.id);
    }

    /// Deliver every result the worker has posted so far, without blocking.
    /// Returns how many callbacks ran.
    pub fn dispatch(&self) -> usize {
        let mut delivered = 0;
        loop {
            match self.result_rx.try_recv() {
                Ok(result) => delivered += usize::from(self.deliver(result)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered + self.reap_dead_worker()
    }

    /// Like [`dispatch`](Self::dispatch), but wait up to `timeout` for the
    /// first result when none is ready.
    ///
    /// The wait is cut into short slices so a dead worker is noticed
    /// promptly instead of after the whole timeout.
    pub fn dispatch_timeout(&self, timeout: Duration) -> usize {
        if self.pending_count() == 0 {
            return self.dispatch();
        }
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.reap_dead_worker();
            }
            let slice = (deadline - now).min(WORKER_CHECK_INTERVAL);
            match self.result_rx.recv_timeout(slice) {
                Ok(result) => return usize::from(self.deliver(result)) + self.dispatch(),
                Err(RecvTimeoutError::Timeout) => {
                    let reaped = self.reap_dead_worker();
                    if reaped > 0 || self.pending_count() == 0 {
                        return reaped;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return self.reap_dead_worker(),
            }
        }
    }

    /// Keep dispatching until nothing is pending or `timeout` runs out.
    /// Returns how many callbacks ran.
    pub fn dispatch_all(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut delivered = self.dispatch();
        while self.pending_count() > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            delivered += self.dispatch_timeout(deadline - now);
        }
        delivered
    }

    /// Shut the bridge down without waiting for the worker.
    ///
    /// The task queue is closed and the worker thread is left to finish its
    /// current decode on its own. Requests still pending are cancelled and
    /// their callbacks never run. Use this instead of dropping when a
    /// blocked or slow decode must not hold up the caller. Returns how many
    /// requests were abandoned.
    pub fn detach(mut self) -> usize {
        let abandoned: Vec<Completer> = self.pending.borrow_mut().drain().map(|(_, c)| c).collect();
        for completer in &abandoned {
            completer.handle.cancel();
        }
        let abandoned = abandoned.len();
        self.task_tx.take();
        if let Some(worker) = self.worker.take() {
            debug!(
                abandoned,
                finished = worker.is_finished(),
                "Detached disk worker"
            );
        }
        abandoned
    }

    fn deliver(&self, result: WorkerResult) -> bool {
        // Release the map before the callback runs; it may call back in
        let completer = self.pending.borrow_mut().remove(&result.id);
        match completer {
            Some(completer) => completer.complete(result.result),
            None => {
                trace!(id = result.id, "Result for cancelled request dropped");
                false
            }
        }
    }

    /// If the worker died, queued requests will never be answered; fail
    /// them all.
    fn reap_dead_worker(&self) -> usize {
        let dead = self.worker.as_ref().is_some_and(|w| w.is_finished());
        if !dead || self.pending_count() == 0 {
            return 0;
        }
        // Anything the worker managed to post before dying goes first
        let mut delivered = 0;
        while let Ok(result) = self.result_rx.try_recv() {
            delivered += usize::from(self.deliver(result));
        }
        let orphaned: Vec<Completer> = {
            let mut pending = self.pending.borrow_mut();
            let mut ids: Vec<u64> = pending.keys().copied().collect();
            ids.sort_unstable();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "Disk worker died with requests queued");
        }
        for completer in orphaned {
            delivered += usize::from(completer.complete(Err(LoadError::ResultConstruction)));
        }
        delivered
    }
}

impl Drop for DiskBridge {
    fn drop(&mut self) {
        // Closing the task channel ends the worker loop once the queue drains
        self.task_tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Disk worker panicked");
        }
    }
}

fn run_worker(
    save_root: &Path,
    backend: &dyn ImageBackend,
    tasks: Receiver<DiskTask>,
    results: Sender<WorkerResult>,
) {
    for task in tasks {
        let result = load_from_disk(save_root, backend, &task);
        if results
            .send(WorkerResult {
                id: task.id,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    trace!("Disk worker exiting");
}

fn load_from_disk(
    save_root: &Path,
    backend: &dyn ImageBackend,
    task: &DiskTask,
) -> Result<LoadedImage, LoadError> {
    let path = task
        .owner
        .directory(save_root, task.name.location)
        .join(&task.name.filename);

    let checks = Accessibility::check(&path);
    if !checks.is_ok() {
        debug!(id = task.id, path = %path.display(), %checks, "Image not readable on disk");
        return Err(LoadError::Inaccessible { path, checks });
    }

    let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
        backend.decode_for_display(&path, task.hint)
    }));
    let image = match decoded {
        Ok(result) => result.map_err(|e| {
            warn!(id = task.id, path = %path.display(), error = %e, "Could not decode image");
            LoadError::Decode {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?,
        Err(payload) => {
            let reason = format!("decoder panicked: {}", panic_message(payload.as_ref()));
            warn!(id = task.id, path = %path.display(), %reason, "Could not decode image");
            return Err(LoadError::Decode { path, reason });
        }
    };

    trace!(id = task.id, path = %path.display(), width = image.width(), height = image.height(), "Loaded image from disk");
    Ok(LoadedImage {
        image,
        path: Some(path),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
