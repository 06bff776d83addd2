//! Watching the bonded devices of one [`DeviceCategory`].
//!
//! A [`DiscoveryService`] subscribes to an [`EventSource`] and, every time the source reports an
//! [`Event`], re-reads the set of bonded devices, keeps the ones whose [`MajorClass`] belongs to
//! the configured category, and hands the result to a [`DeviceListener`].
//!
//! [`MajorClass`]: crate::class::MajorClass

use std::{
    any::Any,
    cell::Cell,
    collections::BTreeSet,
    future::Future,
    mem,
    panic::{self, AssertUnwindSafe},
    ptr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use futures_util::future::{AbortHandle, Abortable};

use crate::{
    adapter::Adapter,
    category::DeviceCategory,
    class::MajorClass,
    device::DeviceRecord,
    event::{Event, EventFilter},
    Error, Result,
};

/// Receives the results of a [`DiscoveryService`].
///
/// Methods are called from whatever thread the [`EventSource`] dispatches events on, and from the
/// thread calling [`DiscoveryService::start`]. Calls are never concurrent with each other.
pub trait DeviceListener: Send + Sync {
    /// Called with the bonded devices of the requested category.
    ///
    /// The set can be empty if devices are bonded, but none of them match.
    fn on_devices_found(&self, devices: BTreeSet<DeviceRecord>);

    /// Called when the bonded devices could not be determined.
    ///
    /// The error is always classified as [`ErrorClass::DiscoveryFailure`] and wraps the cause.
    /// The subscription stays active.
    ///
    /// [`ErrorClass::DiscoveryFailure`]: crate::ErrorClass::DiscoveryFailure
    fn on_error(&self, error: Error);
}

/// Callback invoked by an [`EventSource`] for every [`Event`] of a registration.
///
/// An `Err` means that the source can no longer deliver events for this registration. The handler
/// is not invoked again after that.
pub type EventHandler = Box<dyn FnMut(Result<Event>) + Send + 'static>;

/// A source of Bluetooth [`Event`]s and bonded-device snapshots.
///
/// [`BluezSource`] is the implementation backed by BlueZ.
pub trait EventSource: Send + Sync + 'static {
    /// A live registration. Dropping it must unregister the handler.
    type Registration: Send + 'static;

    /// Registers `handler` for all events matching `filter`.
    ///
    /// The handler must be invoked for one event at a time, in the order the events occurred. It
    /// may be invoked from any thread, and may be invoked before this method returns.
    fn register(&self, filter: EventFilter, handler: EventHandler) -> Result<Self::Registration>;

    /// Returns a snapshot of the currently bonded devices.
    fn bonded_devices(&self) -> Result<Vec<DeviceRecord>>;

    /// Tears down a registration obtained from [`EventSource::register`].
    ///
    /// Once this returns, the registration's handler must not be invoked again, unless this is
    /// called from within the handler itself.
    fn unregister(&self, registration: Self::Registration) {
        drop(registration);
    }
}

impl<S: EventSource> EventSource for Arc<S> {
    type Registration = S::Registration;

    fn register(&self, filter: EventFilter, handler: EventHandler) -> Result<Self::Registration> {
        (**self).register(filter, handler)
    }

    fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        (**self).bonded_devices()
    }

    fn unregister(&self, registration: Self::Registration) {
        (**self).unregister(registration)
    }
}

/// An [`EventSource`] backed by a BlueZ [`Adapter`].
///
/// Every registration gets its own dispatch thread, which runs the adapter's
/// [`EventStream`][crate::EventStream] and invokes the handler.
///
/// D-Bus calls are driven to completion on the calling thread. The connection is serviced by
/// zbus' own executor thread, so this works regardless of any async runtime the caller runs on.
pub struct BluezSource {
    adapter: Adapter,
}

impl BluezSource {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

impl EventSource for BluezSource {
    type Registration = Dispatcher;

    fn register(&self, filter: EventFilter, mut handler: EventHandler) -> Result<Dispatcher> {
        // Subscribe on the calling thread, so that failures are reported to the caller.
        let mut stream = pollster::block_on(self.adapter.event_stream(filter))?;

        let name = self.adapter.device_name().to_string();
        let dispatch = {
            let name = name.clone();
            async move {
                loop {
                    match stream.next().await {
                        Ok(event) => handler(Ok(event)),
                        Err(e) => {
                            log::error!("{}: {} (no further events will be delivered)", name, e);
                            handler(Err(e));
                            return;
                        }
                    }
                }
            }
        };

        Dispatcher::spawn(format!("bondwatch-{}", name), dispatch)
    }

    fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        pollster::block_on(self.adapter.bonded_devices())
    }
}

/// A registration with a [`BluezSource`].
///
/// Dropping it stops the dispatch thread and removes the D-Bus subscription.
pub struct Dispatcher {
    abort: AbortHandle,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Runs `dispatch` to completion on a new thread called `name`, until the dispatcher is
    /// dropped.
    fn spawn<F>(name: String, dispatch: F) -> Result<Self>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (abort, abort_registration) = AbortHandle::new_pair();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if pollster::block_on(Abortable::new(dispatch, abort_registration)).is_err() {
                    log::debug!("{}: event dispatch stopped", name);
                }
            })
            .map_err(|e| Error::from(format!("failed to spawn event dispatch thread: {}", e)))?;

        Ok(Self {
            abort,
            thread: Some(thread),
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.abort.abort();

        let Some(thread) = self.thread.take() else { return };
        // Unregistering from within the handler; the thread exits once the handler returns.
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            log::error!("event dispatch thread panicked");
        }
    }
}

thread_local! {
    /// The service whose filtering pass is running on this thread, if any.
    static IN_PASS: Cell<*const Shared> = const { Cell::new(ptr::null()) };
}

type Deferred = Box<dyn FnOnce() + Send>;

/// State shared between a [`DiscoveryService`] and the handlers it registers.
struct Shared {
    category: DeviceCategory,
    /// Generation of the active subscription, or 0 while idle.
    active: AtomicU64,
    /// Held for the duration of every filtering pass.
    pass_lock: Mutex<()>,
    /// Registrations released from within a pass. They are torn down once `pass_lock` is free,
    /// since tearing one down may wait for its dispatch thread, which may be waiting for the lock.
    deferred: Mutex<Vec<Deferred>>,
}

struct PassMarker {
    previous: *const Shared,
}

impl PassMarker {
    fn enter(shared: &Shared) -> Self {
        let previous = IN_PASS.with(|cur| cur.replace(shared));
        Self { previous }
    }
}

impl Drop for PassMarker {
    fn drop(&mut self) {
        IN_PASS.with(|cur| cur.set(self.previous));
    }
}

impl Shared {
    fn in_pass_here(&self) -> bool {
        IN_PASS.with(|cur| ptr::eq(cur.get(), self))
    }

    /// Runs `body` with the pass lock held, if the subscription `generation` is still active.
    fn guarded(&self, generation: u64, body: impl FnOnce()) {
        // A listener may restart the service from within a callback, which runs a nested pass on
        // this thread while the lock is already held.
        if self.in_pass_here() {
            self.run_if_active(generation, body);
            return;
        }

        {
            let _guard = lock(&self.pass_lock);
            let _marker = PassMarker::enter(self);
            self.run_if_active(generation, body);
        }
        self.run_deferred();
    }

    fn run_if_active(&self, generation: u64, body: impl FnOnce()) {
        if self.active.load(Ordering::SeqCst) != generation {
            log::trace!("subscription #{} is gone, skipping pass", generation);
            return;
        }
        body();
    }

    fn defer(&self, f: Deferred) {
        lock(&self.deferred).push(f);
    }

    fn run_deferred(&self) {
        let deferred = mem::take(&mut *lock(&self.deferred));
        for f in deferred {
            f();
        }
    }

    /// Runs one filtering pass for the subscription `generation` and reports the outcome.
    ///
    /// Does nothing if that subscription is no longer active. Never panics.
    fn pass<S: EventSource>(&self, generation: u64, source: &S, listener: &dyn DeviceListener) {
        self.guarded(generation, || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.filter(source))) {
                Ok(Ok(Some(devices))) => Ok(devices),
                Ok(Ok(None)) => {
                    log::debug!("no bonded devices, nothing to report");
                    return;
                }
                Ok(Err(e)) => Err(Error::discovery(e)),
                Err(payload) => Err(Error::discovery(Error::from(format!(
                    "panic while reading bonded devices: {}",
                    panic_message(&*payload)
                )))),
            };
            self.deliver(listener, outcome);
        });
    }

    /// Tells the listener of subscription `generation` that its event source failed.
    fn fail(&self, generation: u64, listener: &dyn DeviceListener, error: Error) {
        self.guarded(generation, || {
            log::debug!("subscription #{} lost its event source", generation);
            self.deliver(listener, Err(Error::discovery(error)));
        });
    }

    fn deliver(&self, listener: &dyn DeviceListener, outcome: Result<BTreeSet<DeviceRecord>>) {
        let delivery = panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            Ok(devices) => {
                log::debug!("{} bonded {} device(s)", devices.len(), self.category);
                listener.on_devices_found(devices);
            }
            Err(e) => {
                log::debug!("reporting error to listener: {}", e);
                listener.on_error(e);
            }
        }));
        if let Err(payload) = delivery {
            log::error!("device listener panicked: {}", panic_message(&*payload));
        }
    }

    /// Returns the bonded devices of the configured category, or `None` if nothing is bonded.
    fn filter<S: EventSource>(&self, source: &S) -> Result<Option<BTreeSet<DeviceRecord>>> {
        let bonded = source.bonded_devices()?;
        if bonded.is_empty() {
            return Ok(None);
        }

        let classes = self.category.major_classes();
        let matching = bonded
            .into_iter()
            .filter(|device| match device.major_class() {
                Some(class) => classes.contains(&class),
                None => false,
            })
            .collect();
        Ok(Some(matching))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Listener panics are caught before they can poison anything, but stay usable regardless.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Control<R> {
    last_generation: u64,
    registration: Option<R>,
}

/// Watches the bonded devices of one [`DeviceCategory`].
///
/// The service is either idle or subscribed. [`DiscoveryService::start`] subscribes to the
/// [`EventSource`] and immediately reports the current bonded devices; every subsequent
/// [`Event`] triggers another report to the same [`DeviceListener`].
/// [`DiscoveryService::stop`] (or dropping the service) unsubscribes.
///
/// If the event source fails, the listener receives one last [`DeviceListener::on_error`]. The
/// service stays subscribed until it is stopped or restarted.
///
/// # Example
///
/// ```no_run
/// use std::{collections::BTreeSet, sync::Arc};
///
/// use bondwatch::{
///     device::DeviceRecord, Adapter, BluezSource, DeviceCategory, DeviceListener,
///     DiscoveryService, Error, Session,
/// };
///
/// struct Print;
///
/// impl DeviceListener for Print {
///     fn on_devices_found(&self, devices: BTreeSet<DeviceRecord>) {
///         println!("{:?}", devices);
///     }
///
///     fn on_error(&self, error: Error) {
///         eprintln!("{}", error);
///     }
/// }
///
/// # fn main() -> bondwatch::Result<()> {
/// let session = pollster::block_on(Session::new())?;
/// let adapter = pollster::block_on(Adapter::open(&session))?;
/// let service = DiscoveryService::new(BluezSource::new(adapter), DeviceCategory::Printer)?;
/// service.start(Some(Arc::new(Print)))?;
/// // ...
/// service.stop();
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryService<S: EventSource> {
    source: Arc<S>,
    shared: Arc<Shared>,
    control: Mutex<Control<S::Registration>>,
}

impl<S: EventSource> DiscoveryService<S> {
    /// Creates an idle service looking for devices of the given `category`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorClass::UnmappedCategory`] if no major device class satisfies `category`.
    ///
    /// [`ErrorClass::UnmappedCategory`]: crate::ErrorClass::UnmappedCategory
    pub fn new(source: S, category: DeviceCategory) -> Result<Self> {
        if category.major_classes().is_empty() {
            return Err(Error::unmapped_category(category));
        }

        Ok(Self {
            source: Arc::new(source),
            shared: Arc::new(Shared {
                category,
                active: AtomicU64::new(0),
                pass_lock: Mutex::new(()),
                deferred: Mutex::new(Vec::new()),
            }),
            control: Mutex::new(Control {
                last_generation: 0,
                registration: None,
            }),
        })
    }

    /// Returns the category this service is looking for.
    pub fn category(&self) -> DeviceCategory {
        self.shared.category
    }

    /// Returns the major device classes that satisfy [`DiscoveryService::category`].
    pub fn major_classes(&self) -> &'static [MajorClass] {
        self.shared.category.major_classes()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns whether the service is currently subscribed.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst) != 0
    }

    /// Subscribes to the [`EventSource`] and reports the bonded devices to `listener`.
    ///
    /// One report is made before this method returns. After that, `listener` receives at most one
    /// report per [`Event`], until [`DiscoveryService::stop`] is called. If the service is already
    /// subscribed, the previous subscription is torn down first and its listener is not called
    /// again.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorClass::InvalidListener`] if `listener` is `None`, and with the source's
    /// error if the registration fails. In both cases the service is left idle.
    ///
    /// [`ErrorClass::InvalidListener`]: crate::ErrorClass::InvalidListener
    pub fn start(&self, listener: Option<Arc<dyn DeviceListener>>) -> Result<()> {
        let listener = listener.ok_or_else(Error::invalid_listener)?;

        let (generation, previous) = {
            let mut control = lock(&self.control);
            control.last_generation += 1;
            let generation = control.last_generation;
            self.shared.active.store(generation, Ordering::SeqCst);
            (generation, control.registration.take())
        };
        if let Some(previous) = previous {
            log::debug!("restarting, dropping previous subscription");
            self.release(previous);
        }

        let handler: EventHandler = {
            let shared = Arc::clone(&self.shared);
            let source = Arc::clone(&self.source);
            let listener = Arc::clone(&listener);
            Box::new(move |event: Result<Event>| match event {
                Ok(event) => {
                    log::debug!("{:?}: re-reading bonded devices", event);
                    shared.pass(generation, &*source, &*listener);
                }
                Err(e) => shared.fail(generation, &*listener, e),
            })
        };

        // The source may already invoke the handler here, so `control` must not be held.
        let registration = match self.source.register(EventFilter::all(), handler) {
            Ok(registration) => registration,
            Err(e) => {
                let _ = self.shared.active.compare_exchange(
                    generation,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                return Err(e);
            }
        };

        let superseded = {
            let mut control = lock(&self.control);
            if self.shared.active.load(Ordering::SeqCst) == generation {
                control.registration = Some(registration);
                None
            } else {
                Some(registration)
            }
        };
        if let Some(registration) = superseded {
            log::debug!("subscription #{} was stopped while starting", generation);
            self.release(registration);
            return Ok(());
        }

        log::debug!(
            "subscription #{} watching for {} devices ({:?})",
            generation,
            self.shared.category,
            self.shared.category.major_classes()
        );
        self.shared.pass(generation, &*self.source, &*listener);
        Ok(())
    }

    /// Tears down the subscription, if there is one.
    ///
    /// Once this returns, the listener passed to [`DiscoveryService::start`] will not be called
    /// again. If a report is being delivered on another thread, this waits for it to finish.
    /// Calling this while idle does nothing.
    pub fn stop(&self) {
        let (was_active, registration) = {
            let mut control = lock(&self.control);
            let was_active = self.shared.active.swap(0, Ordering::SeqCst) != 0;
            (was_active, control.registration.take())
        };
        if !was_active && registration.is_none() {
            log::trace!("stop: not subscribed");
            return;
        }

        match registration {
            Some(registration) => self.release(registration),
            // Stopped while `start` is still registering; it releases the registration itself.
            None if !self.shared.in_pass_here() => drop(lock(&self.shared.pass_lock)),
            None => {}
        }
        log::debug!("stopped watching for {} devices", self.shared.category);
    }

    /// Unregisters `registration` and waits until no pass of it is running.
    ///
    /// From within a pass of this service, both would wait for the pass itself, so the
    /// registration is handed to the outermost pass instead. Its generation is no longer active,
    /// so its handler delivers nothing in the meantime.
    fn release(&self, registration: S::Registration) {
        if self.shared.in_pass_here() {
            let source = Arc::clone(&self.source);
            self.shared.defer(Box::new(move || source.unregister(registration)));
            return;
        }

        self.source.unregister(registration);
        // Any pass that starts from now on sees its generation as inactive.
        drop(lock(&self.shared.pass_lock));
    }
}

impl<S: EventSource> Drop for DiscoveryService<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
