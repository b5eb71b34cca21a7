use std::sync::{mpsc, Arc, Mutex};

use log::{debug, info, warn};

use crate::{
    config::DEFAULT_MAX_RETRIES,
    error::AttachError,
    types::{AttachmentState, DeviceAddress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    StationStarted,
    Disconnected,
    AddressAssigned(DeviceAddress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationRequest {
    Connect,
    Reconnect { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(DeviceAddress),
    Failed { retries: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    pub request: Option<StationRequest>,
    pub outcome: Option<AttachOutcome>,
}

#[derive(Debug, Clone)]
pub struct AttachmentMachine {
    state: AttachmentState,
    retries: u32,
    max_retries: u32,
    address: Option<DeviceAddress>,
}

impl Default for AttachmentMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl AttachmentMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: AttachmentState::Idle,
            retries: 0,
            max_retries,
            address: None,
        }
    }

    pub fn state(&self) -> AttachmentState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn begin(&mut self) {
        if self.state == AttachmentState::Idle {
            self.state = AttachmentState::Connecting;
        }
    }

    pub fn handle(&mut self, event: NetworkEvent) -> Transition {
        match (self.state, event) {
            (AttachmentState::Connecting, NetworkEvent::StationStarted) => Transition {
                request: Some(StationRequest::Connect),
                outcome: None,
            },
            (AttachmentState::Connecting, NetworkEvent::Disconnected) => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    Transition {
                        request: Some(StationRequest::Reconnect {
                            attempt: self.retries,
                        }),
                        outcome: None,
                    }
                } else {
                    self.state = AttachmentState::Failed;
                    Transition {
                        request: None,
                        outcome: Some(AttachOutcome::Failed {
                            retries: self.retries,
                        }),
                    }
                }
            }
            (AttachmentState::Connecting, NetworkEvent::AddressAssigned(address)) => {
                self.state = AttachmentState::Attached;
                self.retries = 0;
                self.address = Some(address);
                Transition {
                    request: None,
                    outcome: Some(AttachOutcome::Attached(address)),
                }
            }
            (state, event) => {
                debug!("ignoring {event:?} in state {}", state.as_str());
                Transition::default()
            }
        }
    }
}

pub trait StationControl: Clone + Send + 'static {
    fn start(&mut self) -> Result<(), AttachError>;
    fn request(&mut self, request: StationRequest) -> Result<(), AttachError>;
}

pub trait NotificationSource {
    type Subscription;

    fn subscribe_station<F>(&self, handler: F) -> Result<Self::Subscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static;

    fn subscribe_address<F>(&self, handler: F) -> Result<Self::Subscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static;
}

type OutcomeSender = mpsc::Sender<Result<DeviceAddress, AttachError>>;

struct HandlerState<C> {
    machine: AttachmentMachine,
    control: C,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkAttachment {
    max_retries: u32,
}

impl Default for NetworkAttachment {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl NetworkAttachment {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn attempt_attach<N, C>(
        &self,
        source: &N,
        mut control: C,
    ) -> Result<DeviceAddress, AttachError>
    where
        N: NotificationSource,
        C: StationControl,
    {
        let mut machine = AttachmentMachine::new(self.max_retries);
        machine.begin();

        let shared = Arc::new(Mutex::new(HandlerState {
            machine,
            control: control.clone(),
        }));
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let station_subscription = {
            let shared = shared.clone();
            let outcome_tx = outcome_tx.clone();
            source.subscribe_station(move |event| on_event(&shared, &outcome_tx, event))?
        };
        let address_subscription = {
            let shared = shared.clone();
            let outcome_tx = outcome_tx.clone();
            source.subscribe_address(move |event| on_event(&shared, &outcome_tx, event))?
        };
        // Only the handlers may signal; a closed channel means they are gone.
        drop(outcome_tx);

        info!("station attach started (max {} retries)", self.max_retries);
        let result = match control.start() {
            Ok(()) => outcome_rx.recv().unwrap_or(Err(AttachError::ChannelClosed)),
            Err(err) => Err(err),
        };

        drop(address_subscription);
        drop(station_subscription);
        drop(outcome_rx);

        match &result {
            Ok(address) => info!("station attached with address {address}"),
            Err(err) => warn!("station attach failed: {err}"),
        }
        result
    }
}

fn on_event<C: StationControl>(
    shared: &Mutex<HandlerState<C>>,
    outcome_tx: &OutcomeSender,
    event: NetworkEvent,
) {
    let Ok(mut guard) = shared.lock() else {
        let _ = outcome_tx.send(Err(AttachError::Poisoned));
        return;
    };
    let HandlerState { machine, control } = &mut *guard;

    let transition = machine.handle(event);

    if let Some(request) = transition.request {
        match request {
            StationRequest::Connect => info!("connecting to access point"),
            StationRequest::Reconnect { attempt } => info!(
                "reconnecting to access point ({attempt}/{})",
                machine.max_retries()
            ),
        }
        if let Err(err) = control.request(request) {
            let _ = outcome_tx.send(Err(err));
            return;
        }
    }

    match transition.outcome {
        Some(AttachOutcome::Attached(address)) => {
            let _ = outcome_tx.send(Ok(address));
        }
        Some(AttachOutcome::Failed { retries }) => {
            let _ = outcome_tx.send(Err(AttachError::RetriesExhausted { retries }));
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        net::Ipv4Addr,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use pretty_assertions::assert_eq;

    use super::*;

    fn address() -> DeviceAddress {
        DeviceAddress::new(Ipv4Addr::new(192, 168, 4, 23))
    }

    fn connecting(max_retries: u32) -> AttachmentMachine {
        let mut machine = AttachmentMachine::new(max_retries);
        machine.begin();
        machine
    }

    #[test]
    fn station_start_requests_connect() {
        let mut machine = connecting(10);

        let transition = machine.handle(NetworkEvent::StationStarted);

        assert_eq!(transition.request, Some(StationRequest::Connect));
        assert_eq!(transition.outcome, None);
        assert_eq!(machine.state(), AttachmentState::Connecting);
    }

    #[test]
    fn events_before_begin_are_ignored() {
        let mut machine = AttachmentMachine::new(10);

        assert_eq!(
            machine.handle(NetworkEvent::AddressAssigned(address())),
            Transition::default()
        );
        assert_eq!(machine.state(), AttachmentState::Idle);
    }

    #[test]
    fn fails_only_after_retry_ceiling_is_exhausted() {
        let mut machine = connecting(10);

        for attempt in 1..=10 {
            let transition = machine.handle(NetworkEvent::Disconnected);
            assert_eq!(
                transition.request,
                Some(StationRequest::Reconnect { attempt })
            );
            assert_eq!(machine.state(), AttachmentState::Connecting);
        }
        assert_eq!(machine.retries(), 10);

        let transition = machine.handle(NetworkEvent::Disconnected);

        assert_eq!(transition.request, None);
        assert_eq!(
            transition.outcome,
            Some(AttachOutcome::Failed { retries: 10 })
        );
        assert_eq!(machine.state(), AttachmentState::Failed);
        assert_eq!(machine.retries(), 10);
    }

    #[test]
    fn address_after_max_retries_still_attaches_and_resets_counter() {
        let mut machine = connecting(10);
        for _ in 0..10 {
            machine.handle(NetworkEvent::Disconnected);
        }

        let transition = machine.handle(NetworkEvent::AddressAssigned(address()));

        assert_eq!(transition.outcome, Some(AttachOutcome::Attached(address())));
        assert_eq!(machine.state(), AttachmentState::Attached);
        assert_eq!(machine.retries(), 0);
        assert_eq!(machine.address(), Some(address()));
    }

    #[test]
    fn terminal_states_ignore_further_events() {
        let mut machine = connecting(0);
        machine.handle(NetworkEvent::Disconnected);
        assert_eq!(machine.state(), AttachmentState::Failed);

        assert_eq!(
            machine.handle(NetworkEvent::AddressAssigned(address())),
            Transition::default()
        );
        assert_eq!(machine.state(), AttachmentState::Failed);
        assert_eq!(machine.address(), None);
    }

    #[test]
    fn retry_counter_never_exceeds_ceiling() {
        let mut machine = connecting(3);
        for _ in 0..20 {
            machine.handle(NetworkEvent::StationStarted);
            machine.handle(NetworkEvent::Disconnected);
            assert!(machine.retries() <= machine.max_retries());
        }
    }

    type Handler = Arc<Mutex<Box<dyn FnMut(NetworkEvent) + Send>>>;

    #[derive(Default)]
    struct BusState {
        station: Option<Handler>,
        address: Option<Handler>,
        registered: usize,
        fail_address_subscription: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBus {
        state: Arc<Mutex<BusState>>,
    }

    impl FakeBus {
        fn fire(&self, event: NetworkEvent) {
            let handler = {
                let state = self.state.lock().unwrap();
                match event {
                    NetworkEvent::AddressAssigned(_) => state.address.clone(),
                    _ => state.station.clone(),
                }
            };
            if let Some(handler) = handler {
                (handler.lock().unwrap().as_mut())(event);
            }
        }

        fn active(&self) -> usize {
            let state = self.state.lock().unwrap();
            usize::from(state.station.is_some()) + usize::from(state.address.is_some())
        }

        fn registered(&self) -> usize {
            self.state.lock().unwrap().registered
        }
    }

    enum Class {
        Station,
        Address,
    }

    struct FakeSubscription {
        bus: FakeBus,
        class: Class,
    }

    impl Drop for FakeSubscription {
        fn drop(&mut self) {
            let mut state = self.bus.state.lock().unwrap();
            match self.class {
                Class::Station => state.station = None,
                Class::Address => state.address = None,
            }
        }
    }

    impl NotificationSource for FakeBus {
        type Subscription = FakeSubscription;

        fn subscribe_station<F>(&self, handler: F) -> Result<FakeSubscription, AttachError>
        where
            F: FnMut(NetworkEvent) + Send + 'static,
        {
            let mut state = self.state.lock().unwrap();
            state.station = Some(Arc::new(Mutex::new(Box::new(handler))));
            state.registered += 1;
            Ok(FakeSubscription {
                bus: self.clone(),
                class: Class::Station,
            })
        }

        fn subscribe_address<F>(&self, handler: F) -> Result<FakeSubscription, AttachError>
        where
            F: FnMut(NetworkEvent) + Send + 'static,
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_address_subscription {
                return Err(AttachError::Subscribe {
                    class: "ip",
                    reason: "refused".to_string(),
                });
            }
            state.address = Some(Arc::new(Mutex::new(Box::new(handler))));
            state.registered += 1;
            Ok(FakeSubscription {
                bus: self.clone(),
                class: Class::Address,
            })
        }
    }

    #[derive(Clone)]
    struct ScriptedRadio {
        bus: FakeBus,
        script: Arc<Mutex<VecDeque<NetworkEvent>>>,
        requests: Arc<Mutex<Vec<StationRequest>>>,
        starts: Arc<AtomicUsize>,
    }

    impl ScriptedRadio {
        fn new(bus: &FakeBus, script: impl IntoIterator<Item = NetworkEvent>) -> Self {
            Self {
                bus: bus.clone(),
                script: Arc::new(Mutex::new(script.into_iter().collect())),
                requests: Arc::default(),
                starts: Arc::default(),
            }
        }

        fn emit_next(&self) {
            if let Some(event) = self.script.lock().unwrap().pop_front() {
                let bus = self.bus.clone();
                thread::spawn(move || bus.fire(event));
            }
        }
    }

    impl StationControl for ScriptedRadio {
        fn start(&mut self) -> Result<(), AttachError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.emit_next();
            Ok(())
        }

        fn request(&mut self, request: StationRequest) -> Result<(), AttachError> {
            self.requests.lock().unwrap().push(request);
            self.emit_next();
            Ok(())
        }
    }

    #[test]
    fn attaches_after_transient_disconnects() {
        let bus = FakeBus::default();
        let mut script = vec![NetworkEvent::StationStarted];
        script.extend([NetworkEvent::Disconnected; 3]);
        script.push(NetworkEvent::AddressAssigned(address()));
        let radio = ScriptedRadio::new(&bus, script);

        let result = NetworkAttachment::new(10).attempt_attach(&bus, radio.clone());

        assert_eq!(result.unwrap(), address());
        assert_eq!(radio.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *radio.requests.lock().unwrap(),
            vec![
                StationRequest::Connect,
                StationRequest::Reconnect { attempt: 1 },
                StationRequest::Reconnect { attempt: 2 },
                StationRequest::Reconnect { attempt: 3 },
            ]
        );
        assert_eq!(bus.registered(), 2);
        assert_eq!(bus.active(), 0);
    }

    #[test]
    fn reports_failure_when_retries_run_out() {
        let bus = FakeBus::default();
        let mut script = vec![NetworkEvent::StationStarted];
        script.extend([NetworkEvent::Disconnected; 11]);
        let radio = ScriptedRadio::new(&bus, script);

        let result = NetworkAttachment::new(10).attempt_attach(&bus, radio.clone());

        assert!(matches!(
            result,
            Err(AttachError::RetriesExhausted { retries: 10 })
        ));
        assert_eq!(radio.requests.lock().unwrap().len(), 11);
        assert_eq!(bus.active(), 0);
    }

    #[test]
    fn releases_station_subscription_when_address_registration_fails() {
        let bus = FakeBus::default();
        bus.state.lock().unwrap().fail_address_subscription = true;
        let radio = ScriptedRadio::new(&bus, [NetworkEvent::StationStarted]);

        let result = NetworkAttachment::default().attempt_attach(&bus, radio.clone());

        assert!(matches!(result, Err(AttachError::Subscribe { .. })));
        assert_eq!(radio.starts.load(Ordering::SeqCst), 0);
        assert_eq!(bus.active(), 0);
    }

    #[derive(Clone)]
    struct DeadRadio;

    impl StationControl for DeadRadio {
        fn start(&mut self) -> Result<(), AttachError> {
            Err(AttachError::Station("esp_wifi_start: ESP_ERR_WIFI_NOT_INIT".to_string()))
        }

        fn request(&mut self, _request: StationRequest) -> Result<(), AttachError> {
            Ok(())
        }
    }

    #[test]
    fn start_failure_is_surfaced_and_handlers_released() {
        let bus = FakeBus::default();

        let result = NetworkAttachment::default().attempt_attach(&bus, DeadRadio);

        assert!(matches!(result, Err(AttachError::Station(_))));
        assert_eq!(bus.registered(), 2);
        assert_eq!(bus.active(), 0);
    }
}
