//! `CoreFacade`: the single entry point an application or a wire
//! codec talks to. It owns one instance each of the five other components
//! and translates API calls into their operations, authorizing each one
//! through the injected [`SecurityPolicy`] and scheduling every handler
//! invocation through the [`Dispatcher`] rather than running it inline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::dispatcher::{DispatchMetrics, Dispatcher};
use crate::endpoint::{Destination, EndpointRouter, Frame};
use crate::error::{CoreError, Result, Verdict};
use crate::event_store::{DebounceFilter, EventStore};
use crate::id_allocator::IdAllocator;
use crate::ids::{
    matches_wildcard, ClientId, EventId, EventgroupId, InstanceId, MajorVersion, MethodId, MinorVersion, ServiceId,
    SessionId, ROUTING_CLIENT,
};
use crate::observability::{LogField, Logger};
use crate::registry::{EventKind, Registry};
use crate::security::{SecurityClient, SecurityPolicy};
use crate::subscription::SubscriptionEngine;

pub type MessageHandler = Box<dyn Fn(Frame) + Send + Sync>;
pub type AvailabilityHandler = Box<dyn Fn(ServiceId, InstanceId, bool) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(bool) + Send + Sync>;
pub type SubscriptionStatusHandler = Box<dyn Fn(ServiceId, InstanceId, EventgroupId, ClientId, bool) + Send + Sync>;
pub type WatchdogHandler = Box<dyn Fn() + Send + Sync>;

/// How a new message handler combines with any already registered under the
/// same (service, instance, method) key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationType {
    /// Drops any existing handlers for this key before inserting.
    Replace,
    /// Adds to the tail of the existing list.
    Append,
    /// Adds to the head of the existing list.
    Prepend,
}

type MessageKey = (u16, u16, u16);

#[derive(Default)]
struct Handlers {
    message: BTreeMap<MessageKey, Vec<MessageHandler>>,
    availability: Vec<AvailabilityHandler>,
    state: Vec<StateHandler>,
    subscription_status: Vec<SubscriptionStatusHandler>,
    watchdog: Vec<WatchdogHandler>,
}

/// In-process routing and subscription core.
pub struct CoreFacade {
    config: Arc<dyn Config>,
    logger: Arc<dyn Logger>,
    security: Arc<dyn SecurityPolicy>,
    endpoint: Option<Arc<dyn EndpointRouter>>,
    id_allocator: IdAllocator,
    registry: Registry,
    event_store: EventStore,
    subscriptions: SubscriptionEngine,
    dispatcher: Dispatcher,
    client: RwLock<Option<ClientId>>,
    session: Mutex<SessionId>,
    running: AtomicBool,
    handlers: Arc<RwLock<Handlers>>,
    ticker_stopping: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl CoreFacade {
    pub fn new(config: Arc<dyn Config>, logger: Arc<dyn Logger>, security: Arc<dyn SecurityPolicy>) -> Self {
        let dispatcher = Dispatcher::new(config.max_dispatchers(), config.max_dispatch_time_ms(), logger.clone());
        Self {
            id_allocator: IdAllocator::with_in_memory_store(logger.clone()),
            registry: Registry::new(config.offer_history_capacity(), logger.clone()),
            event_store: EventStore::new(logger.clone()),
            subscriptions: SubscriptionEngine::new(logger.clone()),
            dispatcher,
            client: RwLock::new(None),
            session: Mutex::new(SessionId::ZERO),
            running: AtomicBool::new(false),
            handlers: Arc::new(RwLock::new(Handlers::default())),
            ticker_stopping: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
            config,
            logger,
            security,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn EndpointRouter>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn dispatch_metrics(&self) -> Arc<DispatchMetrics> {
        self.dispatcher.metrics()
    }

    /// `init(app_name, requested)`: allocates this application's
    /// client id via the id allocator.
    pub fn init(&self, app_name: &str, requested: Option<ClientId>) -> Result<ClientId> {
        let allocation = self.id_allocator.request_client_id(&*self.config, app_name, requested)?;
        *self.client.write() = Some(allocation.client_id);
        Ok(allocation.client_id)
    }

    fn client_id(&self) -> ClientId {
        self.client.read().unwrap_or(ClientId::ILLEGAL)
    }

    /// `start()`: marks the core running and notifies state handlers.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.dispatch_state(true);
    }

    /// `stop()`: marks the core stopped, notifies state handlers, and
    /// drains the dispatcher. Safe to call from within a handler callback.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.dispatch_state(false);
        self.dispatcher.stop();
        self.ticker_stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn dispatch_state(&self, running: bool) {
        let handlers = self.handlers.clone();
        self.dispatcher.enqueue(move || {
            for handler in handlers.read().state.iter() {
                handler(running);
            }
        });
    }

    fn check(&self, verdict: Verdict) -> Result<()> {
        if verdict.is_granted() || !self.config.security().enabled {
            return Ok(());
        }
        if self.config.security().audit {
            self.logger.warn(
                "facade",
                "security denial allowed through in audit mode",
                &[LogField::new("client", self.client_id())],
            );
            return Ok(());
        }
        Err(CoreError::NotAuthorized {
            client: self.client_id().get(),
        })
    }

    /// Like [`Self::check`], but never lets a denial through in audit mode.
    /// Used for `authorize_subscribe` when the subscription targets
    /// `ANY_EVENT` (`event == None`): a denial there means at least one
    /// member of the eventgroup is off limits, and that blocks the whole
    /// subscription even while security is otherwise in audit mode.
    fn check_strict(&self, verdict: Verdict) -> Result<()> {
        if verdict.is_granted() || !self.config.security().enabled {
            return Ok(());
        }
        Err(CoreError::NotAuthorized {
            client: self.client_id().get(),
        })
    }

    /// `offer_service(s, i, major, minor)`.
    pub fn offer_service(&self, service: ServiceId, instance: InstanceId, major: MajorVersion, minor: MinorVersion) -> Result<()> {
        let verdict = futures::executor::block_on(self.security.authorize_offer(
            SecurityClient(self.client_id().get() as u32),
            service,
            instance,
        ));
        self.check(verdict)?;
        self.registry.offer(self.client_id(), service, instance, major, minor)?;
        self.notify_availability(service, instance, true);
        Ok(())
    }

    /// `stop_offer_service(s, i)`: clears the payload cache of every event
    /// of (s, i) and every eventgroup's subscriber set, in addition to the
    /// registry's own provider bookkeeping.
    pub fn stop_offer_service(&self, service: ServiceId, instance: InstanceId) -> Result<()> {
        let events = self.registry.event_ids(service, instance);
        self.registry.stop_offer(self.client_id(), service, instance)?;
        for event in events {
            self.event_store.clear_payload(service, instance, event);
        }
        self.subscriptions.clear_subscriptions_for_service_instance(service, instance);
        self.notify_availability(service, instance, false);
        Ok(())
    }

    fn notify_availability(&self, service: ServiceId, instance: InstanceId, available: bool) {
        let handlers = self.handlers.clone();
        let key = (service.get(), instance.get());
        self.dispatcher.enqueue_for(Some(key), move || {
            for handler in handlers.read().availability.iter() {
                handler(service, instance, available);
            }
        });
    }

    /// `request_service(s, i, major, minor)`.
    pub fn request_service(&self, service: ServiceId, instance: InstanceId, major: MajorVersion, minor: MinorVersion) -> Result<()> {
        let verdict = futures::executor::block_on(self.security.authorize_request(
            SecurityClient(self.client_id().get() as u32),
            service,
            instance,
        ));
        self.check(verdict)?;
        self.registry.request(self.client_id(), service, instance, major, minor)
    }

    /// `release_service(s, i)`.
    pub fn release_service(&self, service: ServiceId, instance: InstanceId) -> Result<()> {
        self.registry.release(self.client_id(), service, instance)
    }

    /// `register_event(s, i, e, eventgroups, is_field, is_provided)`.
    pub fn register_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        eventgroups: &[EventgroupId],
        is_field: bool,
        is_provided: bool,
    ) -> Result<()> {
        let event_config = self.config.event_config(service, instance, event);
        let kind = if is_field { EventKind::Field } else { EventKind::Event };
        let reliability = event_config.reliability.unwrap_or(crate::registry::Reliability::Unknown);

        self.registry.register_event(
            service,
            instance,
            event,
            eventgroups,
            kind,
            reliability,
            event_config.cycle_ms,
            event_config.change_resets_cycle,
            event_config.update_on_change,
            is_provided,
        )?;

        let filter = self
            .config
            .debounce_config(service, instance, event)
            .map(|cfg| DebounceFilter::from_config(&cfg))
            .unwrap_or_else(crate::event_store::unfiltered);
        self.event_store.register_event(service, instance, event, filter, is_field, false);
        Ok(())
    }

    /// `stop_offer_event(s, i, e)`.
    pub fn stop_offer_event(&self, service: ServiceId, instance: InstanceId, event: EventId) {
        self.event_store.clear_payload(service, instance, event);
    }

    /// `subscribe(client, s, i, g, major, event)`. For a whole-group
    /// subscription (`event == None`, i.e. `ANY_EVENT`), `authorize_subscribe`
    /// stands for "every member of the group is authorized": a denial
    /// blocks the subscription outright, even in audit mode, unlike the
    /// ordinary per-event audit-bypass `authorize_subscribe` otherwise gets.
    pub fn subscribe(
        &self,
        client: ClientId,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        major: MajorVersion,
        event: Option<EventId>,
    ) -> Result<()> {
        let verdict = futures::executor::block_on(self.security.authorize_subscribe(
            SecurityClient(client.get() as u32),
            service,
            instance,
            eventgroup,
        ));
        if event.is_none() {
            self.check_strict(verdict)?;
        } else {
            self.check(verdict)?;
        }

        let filter = event.and_then(|event| {
            self.config
                .debounce_config(service, instance, event)
                .map(|cfg| DebounceFilter::from_config(&cfg))
        });
        self.subscriptions.subscribe(&self.registry, service, instance, eventgroup, client, major, event, filter);
        // Local delivery is never actually acknowledged over the wire, so it
        // is marked acknowledged immediately rather than left `Subscribing`.
        // Anything that arrived while this subscription was still
        // `Subscribing` is released now and dispatched the normal way.
        let flushed = self
            .subscriptions
            .on_subscription_ack(service, instance, eventgroup, client, event, true);
        for (recipient, flushed_event, payload) in flushed {
            self.dispatch_message(service, instance, flushed_event, recipient, payload);
        }

        let handlers = self.handlers.clone();
        self.dispatcher.enqueue(move || {
            for handler in handlers.read().subscription_status.iter() {
                handler(service, instance, eventgroup, client, true);
            }
        });

        self.deliver_initial_values(service, instance, eventgroup, client, event);
        Ok(())
    }

    /// Sends the current cached payload of every matching field event to a
    /// newly (re)subscribing client, bypassing the broadcast debounce path
    /// since this is a one-off unicast, not a republish.
    fn deliver_initial_values(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        client: ClientId,
        event: Option<EventId>,
    ) {
        let targets: Vec<EventId> = match event {
            Some(event) => vec![event],
            None => self.registry.eventgroup_members(service, instance, eventgroup),
        };
        for target in targets {
            let Some(meta) = self.registry.find_event(service, instance, target) else {
                continue;
            };
            if !meta.kind.is_field() {
                continue;
            }
            let Some(payload) = self.event_store.current_payload(service, instance, target) else {
                continue;
            };
            self.dispatch_message(service, instance, target, client, payload);
        }
    }

    /// `unsubscribe(client, s, i, g, event)`.
    pub fn unsubscribe(
        &self,
        client: ClientId,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: Option<EventId>,
    ) {
        self.subscriptions.unsubscribe(service, instance, eventgroup, client, event);
    }

    /// `notify(s, i, e, payload, force)`: applies the
    /// epsilon/debounce decision and, if forwarded, schedules delivery to
    /// every current subscriber. A subscriber still in the `Subscribing`
    /// state has the payload cached instead of delivered immediately; it is
    /// flushed once that subscription is acknowledged. Returns whether the
    /// value was forwarded.
    pub fn notify(&self, service: ServiceId, instance: InstanceId, event: EventId, payload: Vec<u8>, force: bool) -> bool {
        let outcome = self.event_store.set_payload(service, instance, event, payload, Instant::now(), force);
        if outcome.forwarded {
            self.subscriptions.record_update(service, instance, event);
            let recipients = self.subscriptions.subscribers_for_event(&self.registry, service, instance, event);
            for client in recipients {
                if self
                    .subscriptions
                    .cache_if_subscribing(service, instance, event, client, &outcome.payload)
                {
                    continue;
                }
                self.dispatch_message(service, instance, event, client, outcome.payload.clone());
            }
        }
        outcome.forwarded
    }

    /// `notify_one(client, s, i, e, payload)`: unconditional unicast
    /// delivery to a single subscriber, e.g. for a late-joining client. If
    /// `client`'s subscription is still `Subscribing`, the payload is
    /// cached and flushed on acknowledgement instead of delivered now.
    pub fn notify_one(&self, client: ClientId, service: ServiceId, instance: InstanceId, event: EventId, payload: Vec<u8>) {
        let payload = self.event_store.notify_one(service, instance, event, &payload);
        if self.subscriptions.cache_if_subscribing(service, instance, event, client, &payload) {
            return;
        }
        self.dispatch_message(service, instance, event, client, payload);
    }

    fn dispatch_message(&self, service: ServiceId, instance: InstanceId, event: EventId, client: ClientId, payload: Vec<u8>) {
        if client == ROUTING_CLIENT {
            if let Some(endpoint) = self.endpoint.clone() {
                let key = (service.get(), instance.get());
                self.dispatcher.enqueue_for(Some(key), move || {
                    let _ = futures::executor::block_on(endpoint.send(Destination::Remote(Vec::new()), &payload));
                });
            }
            return;
        }
        let session = self.next_session();
        let frame = Frame {
            service,
            instance,
            member: event.get() | 0x8000,
            client,
            session,
            interface_version: 1,
            message_type: 0x02,
            return_code: 0,
            payload,
        };
        self.enqueue_message_dispatch(frame);
    }

    fn next_session(&self) -> SessionId {
        if !self.config.has_session_handling() {
            return SessionId::ZERO;
        }
        let mut session = self.session.lock();
        *session = session.next();
        *session
    }

    /// Matches `frame` against every registered (service, instance, method)
    /// key, honoring wildcards on either side, and runs the matching
    /// handlers in registration order on the dispatcher. Used both for
    /// frames this core builds itself (event notifications) and for ones
    /// handed up from an [`EndpointRouter`] via [`Self::on_message`].
    fn enqueue_message_dispatch(&self, frame: Frame) {
        let handlers = self.handlers.clone();
        let key = (frame.service.get(), frame.instance.get());
        self.dispatcher.enqueue_for(Some(key), move || {
            let table = &handlers.read().message;
            for (&(service, instance, method), bucket) in table.iter() {
                let matches = matches_wildcard(ServiceId::new(service), frame.service, ServiceId::ANY)
                    && matches_wildcard(InstanceId::new(instance), frame.instance, InstanceId::ANY)
                    && matches_wildcard(MethodId::new(method), MethodId::new(frame.member), MethodId::ANY);
                if matches {
                    for handler in bucket {
                        handler(frame.clone());
                    }
                }
            }
        });
    }

    /// Entry point for a frame decoded by an [`EndpointRouter`] on its own
    /// I/O pool. Never called by this crate itself; a host wires it in via
    /// [`Self::attach_endpoint_callback`].
    pub fn on_message(&self, frame: Frame) {
        self.enqueue_message_dispatch(frame);
    }

    /// Registers this facade's [`Self::on_message`] as the endpoint's
    /// decode callback. Takes `Arc<Self>` because the registered closure
    /// must outlive the call and the endpoint's own I/O pool runs on
    /// threads this facade does not own. A no-op if no endpoint was
    /// configured via [`Self::with_endpoint`].
    pub fn attach_endpoint_callback(self: &Arc<Self>) {
        if let Some(endpoint) = self.endpoint.clone() {
            let facade = self.clone();
            endpoint.on_message(Box::new(move |frame| facade.on_message(frame)));
        }
    }

    /// Starts the background thread that polls for subscriptions due a
    /// `send_current_value_after` resend and delivers them. Takes `Arc<Self>`
    /// for the same reason as [`Self::attach_endpoint_callback`]: the thread
    /// outlives this call. A no-op if a ticker is already running.
    /// [`Self::stop`] signals and joins this thread.
    pub fn start_send_current_value_ticker(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        self.ticker_stopping.store(false, Ordering::SeqCst);
        let facade = self.clone();
        let poll = Duration::from_millis(self.config.send_current_value_poll_ms().max(1));
        *ticker = Some(thread::spawn(move || {
            while !facade.ticker_stopping.load(Ordering::SeqCst) {
                facade.run_send_current_value_tick();
                thread::sleep(poll);
            }
        }));
    }

    fn run_send_current_value_tick(&self) {
        for due in self.subscriptions.due_send_current_value_after(Instant::now()) {
            let Some(payload) = self.event_store.current_payload(due.service, due.instance, due.event) else {
                continue;
            };
            self.notify_one(due.client, due.service, due.instance, due.event, payload);
        }
    }

    /// `send(to, frame)`: routes an already-built frame either to
    /// local message handlers or, for a remote destination, through the
    /// endpoint.
    pub fn send(&self, to: Destination, frame: Frame) -> Result<()> {
        match to {
            Destination::Local(_) => {
                self.enqueue_message_dispatch(frame);
                Ok(())
            }
            Destination::Remote(bytes) => {
                let endpoint = self
                    .endpoint
                    .clone()
                    .ok_or_else(|| CoreError::io("no endpoint router configured"))?;
                futures::executor::block_on(endpoint.send(Destination::Remote(bytes), &frame.payload))
            }
        }
    }

    /// `register_message_handler(s, i, m, handler, type)`: inserts into the
    /// handler table per `reg_type` (`Replace` clears any existing handlers
    /// for this exact key first; `Append`/`Prepend` add to the tail/head of
    /// whatever list is already there). Use `ServiceId::ANY`/`InstanceId::ANY`/
    /// `MethodId::ANY` to match broadly.
    pub fn register_message_handler(
        &self,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        handler: MessageHandler,
        reg_type: RegistrationType,
    ) {
        let key = (service.get(), instance.get(), method.get());
        let mut handlers = self.handlers.write();
        let bucket = handlers.message.entry(key).or_default();
        match reg_type {
            RegistrationType::Replace => *bucket = vec![handler],
            RegistrationType::Append => bucket.push(handler),
            RegistrationType::Prepend => bucket.insert(0, handler),
        }
    }

    pub fn register_availability_handler(&self, handler: AvailabilityHandler) {
        self.handlers.write().availability.push(handler);
    }

    pub fn register_state_handler(&self, handler: StateHandler) {
        self.handlers.write().state.push(handler);
    }

    pub fn register_subscription_status_handler(&self, handler: SubscriptionStatusHandler) {
        self.handlers.write().subscription_status.push(handler);
    }

    pub fn set_watchdog_handler(&self, handler: WatchdogHandler) {
        self.handlers.write().watchdog = vec![handler];
    }

    /// Schedules the watchdog handler, if one is registered. A host calls
    /// this on its own timer; the core never starts a watchdog timer of its
    /// own.
    pub fn watchdog_tick(&self) {
        let handlers = self.handlers.clone();
        self.dispatcher.enqueue(move || {
            for handler in handlers.read().watchdog.iter() {
                handler();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebounceConfig, SecurityConfig, StaticConfig};
    use crate::observability::NullLogger;
    use crate::security::AllowAll;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn facade() -> CoreFacade {
        let config: Arc<dyn Config> = Arc::new(StaticConfig::default());
        CoreFacade::new(config, Arc::new(NullLogger), Arc::new(AllowAll))
    }

    /// Denies every `authorize_subscribe` call, grants everything else —
    /// used to exercise the audit-mode ANY_EVENT strict-deny path.
    #[derive(Clone, Copy, Debug, Default)]
    struct DenySubscribe;

    #[async_trait]
    impl SecurityPolicy for DenySubscribe {
        async fn authorize_offer(&self, _client: SecurityClient, _service: ServiceId, _instance: InstanceId) -> Verdict {
            Verdict::Granted
        }

        async fn authorize_request(&self, _client: SecurityClient, _service: ServiceId, _instance: InstanceId) -> Verdict {
            Verdict::Granted
        }

        async fn authorize_subscribe(
            &self,
            _client: SecurityClient,
            _service: ServiceId,
            _instance: InstanceId,
            _eventgroup: EventgroupId,
        ) -> Verdict {
            Verdict::Denied
        }

        async fn authorize_member(
            &self,
            _client: SecurityClient,
            _service: ServiceId,
            _instance: InstanceId,
            _method: MethodId,
        ) -> Verdict {
            Verdict::Granted
        }
    }

    fn audit_facade() -> CoreFacade {
        let config: Arc<dyn Config> = Arc::new(StaticConfig {
            security: SecurityConfig {
                enabled: true,
                external: false,
                audit: true,
                allow_remote: true,
            },
            ..StaticConfig::default()
        });
        CoreFacade::new(config, Arc::new(NullLogger), Arc::new(DenySubscribe))
    }

    #[test]
    fn offer_then_subscribe_then_notify_delivers_to_subscriber() {
        let core = facade();
        let provider = core.init("provider", None).unwrap();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);
        let e = EventId::new(0x8001);

        core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
        core.register_event(s, i, e, &[g], true, true).unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        {
            let received = received.clone();
            core.register_message_handler(
                ServiceId::ANY,
                InstanceId::ANY,
                MethodId::ANY,
                Box::new(move |frame: Frame| {
                    received.lock().unwrap().push(frame.payload);
                }),
                RegistrationType::Append,
            );
        }

        let subscriber = ClientId::new(0x2001);
        core.subscribe(subscriber, s, i, g, MajorVersion(1), None).unwrap();

        let forwarded = core.notify(s, i, e, vec![1, 2, 3], false);
        assert!(forwarded);

        // handlers run on the dispatcher; give it a moment to drain.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*received.lock().unwrap(), vec![vec![1, 2, 3]]);

        let _ = provider;
        core.stop();
    }

    #[test]
    fn subscribing_to_a_field_delivers_the_cached_value_immediately() {
        let core = facade();
        core.init("provider", None).unwrap();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);
        let e = EventId::new(0x9001);

        core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
        core.register_event(s, i, e, &[g], true, true).unwrap();
        core.notify(s, i, e, vec![9, 9], false);

        let received = Arc::new(StdMutex::new(Vec::new()));
        {
            let received = received.clone();
            core.register_message_handler(
                ServiceId::ANY,
                InstanceId::ANY,
                MethodId::ANY,
                Box::new(move |frame: Frame| {
                    received.lock().unwrap().push(frame.payload);
                }),
                RegistrationType::Append,
            );
        }

        core.subscribe(ClientId::new(0x2001), s, i, g, MajorVersion(1), None).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*received.lock().unwrap(), vec![vec![9, 9]]);

        core.stop();
    }

    #[test]
    fn message_handler_filters_by_method_and_respects_registration_order() {
        let core = facade();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let m = MethodId::new(0x0042);
        let order = Arc::new(StdMutex::new(Vec::new()));

        {
            let order = order.clone();
            core.register_message_handler(
                s,
                i,
                m,
                Box::new(move |_| order.lock().unwrap().push("second")),
                RegistrationType::Append,
            );
        }
        {
            let order = order.clone();
            core.register_message_handler(
                s,
                i,
                m,
                Box::new(move |_| order.lock().unwrap().push("first")),
                RegistrationType::Prepend,
            );
        }
        // A handler on a different method must never fire for this frame.
        let other_method_fired = Arc::new(StdMutex::new(false));
        {
            let other_method_fired = other_method_fired.clone();
            core.register_message_handler(
                s,
                i,
                MethodId::new(0x0099),
                Box::new(move |_| *other_method_fired.lock().unwrap() = true),
                RegistrationType::Append,
            );
        }

        core.on_message(Frame {
            service: s,
            instance: i,
            member: m.get(),
            client: ClientId::new(0x2001),
            session: SessionId::ZERO,
            interface_version: 1,
            message_type: 0x00,
            return_code: 0,
            payload: vec![],
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(!*other_method_fired.lock().unwrap());

        core.stop();
    }

    #[test]
    fn replace_drops_existing_handlers_for_the_same_key() {
        let core = facade();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let m = MethodId::new(0x0042);
        let old_fired = Arc::new(StdMutex::new(false));
        {
            let old_fired = old_fired.clone();
            core.register_message_handler(
                s,
                i,
                m,
                Box::new(move |_| *old_fired.lock().unwrap() = true),
                RegistrationType::Append,
            );
        }
        let new_fired = Arc::new(StdMutex::new(false));
        {
            let new_fired = new_fired.clone();
            core.register_message_handler(
                s,
                i,
                m,
                Box::new(move |_| *new_fired.lock().unwrap() = true),
                RegistrationType::Replace,
            );
        }

        core.on_message(Frame {
            service: s,
            instance: i,
            member: m.get(),
            client: ClientId::new(0x2001),
            session: SessionId::ZERO,
            interface_version: 1,
            message_type: 0x00,
            return_code: 0,
            payload: vec![],
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!*old_fired.lock().unwrap());
        assert!(*new_fired.lock().unwrap());

        core.stop();
    }

    #[test]
    fn any_event_subscribe_denial_blocks_even_in_audit_mode() {
        let core = audit_facade();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);

        let err = core
            .subscribe(ClientId::new(0x2001), s, i, g, MajorVersion(1), None)
            .unwrap_err();
        assert_eq!(err, CoreError::NotAuthorized { client: 0 });
    }

    #[test]
    fn selective_event_subscribe_denial_still_passes_through_in_audit_mode() {
        let core = audit_facade();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);
        let e = EventId::new(0x8001);

        // Unlike the ANY_EVENT case, a single-event subscription's denial is
        // only logged and let through while security is in audit mode.
        core.subscribe(ClientId::new(0x2001), s, i, g, MajorVersion(1), Some(e))
            .unwrap();
    }

    #[test]
    fn stop_offer_service_clears_payload_and_subscribers() {
        let core = facade();
        core.init("provider", None).unwrap();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);
        let e = EventId::new(0x8001);

        core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
        core.register_event(s, i, e, &[g], true, true).unwrap();
        core.notify(s, i, e, vec![4, 2], false);
        core.subscribe(ClientId::new(0x2001), s, i, g, MajorVersion(1), None).unwrap();

        assert!(!core.subscriptions.subscribers_for_group(s, i, g).is_empty());

        core.stop_offer_service(s, i).unwrap();

        assert_eq!(core.event_store.current_payload(s, i, e), None);
        assert!(core.subscriptions.subscribers_for_group(s, i, g).is_empty());

        core.stop();
    }

    #[test]
    fn send_current_value_after_ticker_resends_the_cached_payload() {
        let mut debounce = BTreeMap::new();
        let s = ServiceId::new(1);
        let i = InstanceId::new(1);
        let g = EventgroupId::new(0xA);
        let e = EventId::new(0x8001);
        debounce.insert(
            (s.get(), i.get(), e.get()),
            DebounceConfig {
                on_change: false,
                on_change_resets_interval: false,
                interval_ms: Some(20),
                ignore: Default::default(),
                send_current_value_after: true,
            },
        );
        let config: Arc<dyn Config> = Arc::new(StaticConfig {
            debounce,
            ..StaticConfig::default()
        });
        let core = Arc::new(CoreFacade::new(config, Arc::new(NullLogger), Arc::new(AllowAll)));

        core.init("provider", None).unwrap();
        core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
        core.register_event(s, i, e, &[g], true, true).unwrap();
        core.notify(s, i, e, vec![7, 7], false);

        let received = Arc::new(StdMutex::new(Vec::new()));
        {
            let received = received.clone();
            core.register_message_handler(
                ServiceId::ANY,
                InstanceId::ANY,
                MethodId::ANY,
                Box::new(move |frame: Frame| {
                    received.lock().unwrap().push(frame.payload);
                }),
                RegistrationType::Append,
            );
        }

        core.subscribe(ClientId::new(0x2001), s, i, g, MajorVersion(1), Some(e)).unwrap();
        core.start_send_current_value_ticker();

        std::thread::sleep(Duration::from_millis(250));
        core.stop();

        let count = received.lock().unwrap().len();
        assert!(
            count >= 2,
            "expected the timer to have forced at least one resend beyond the initial-value delivery, got {count}"
        );
        assert!(received.lock().unwrap().iter().all(|p| *p == vec![7, 7]));
    }
}
