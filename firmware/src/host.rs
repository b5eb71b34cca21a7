use std::{
    collections::VecDeque,
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use switch_common::{
    ActionDispatcher, AttachError, BinaryOutput, CommandServer, DeviceAddress, MemoryOutput,
    NetworkAttachment, NetworkEvent, NotificationSource, OutputError, OutputState,
    StationControl, StationRequest, SwitchConfig,
};

const HOST_DEFAULT_PORT: u16 = 8080;
const SIM_EVENT_DELAY_MS: u64 = 150;

type Handler = Arc<Mutex<Box<dyn FnMut(NetworkEvent) + Send>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimulationConfig {
    drops: u32,
    address: Ipv4Addr,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            drops: 2,
            address: Ipv4Addr::LOCALHOST,
        }
    }
}

#[derive(Default)]
struct Handlers {
    station: Option<Handler>,
    address: Option<Handler>,
}

#[derive(Clone, Default)]
struct SimulatedNetwork {
    handlers: Arc<Mutex<Handlers>>,
}

enum HandlerSlot {
    Station,
    Address,
}

struct SimulatedSubscription {
    network: SimulatedNetwork,
    slot: HandlerSlot,
}

#[derive(Clone)]
struct SimulatedStation {
    network: SimulatedNetwork,
    script: Arc<Mutex<VecDeque<NetworkEvent>>>,
}

#[derive(Default)]
struct LoggedOutput {
    inner: MemoryOutput,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, simulation) = load_config(|key| std::env::var(key).ok())?;
    info!(
        "host switch starting: port={}, simulated drops={}, address={}",
        config.server.port, simulation.drops, simulation.address
    );

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    thread::Builder::new()
        .name("switch".to_string())
        .spawn(move || {
            let _ = done_tx.send(run_switch(&config, &simulation));
        })
        .context("failed to spawn switch thread")?;

    tokio::select! {
        result = done_rx => result.context("switch thread exited without a result")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; shutting down");
            Ok(())
        }
    }
}

fn run_switch(config: &SwitchConfig, simulation: &SimulationConfig) -> anyhow::Result<()> {
    let network = SimulatedNetwork::default();
    let station = SimulatedStation::new(&network, simulation);

    let address = NetworkAttachment::new(config.network.max_retries)
        .attempt_attach(&network, station)
        .context("failed to associate to AP")?;

    let dispatcher = ActionDispatcher::new(address, LoggedOutput::default());
    let server =
        CommandServer::bind(&config.server, dispatcher).context("failed to start command server")?;

    match server.run() {
        Ok(never) => match never {},
        Err(err) => Err(anyhow::Error::from(err).context("command server stopped")),
    }
}

fn load_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<(SwitchConfig, SimulationConfig)> {
    let mut config = SwitchConfig::default();
    config.network.wifi_ssid = "simulated".to_string();
    config.server.port = parse_var(&lookup, "SWITCH_PORT")?.unwrap_or(HOST_DEFAULT_PORT);

    if let Some(max) = parse_var(&lookup, "SWITCH_MAX_REQUEST_BYTES")? {
        config.server.max_request_bytes = max;
    }
    if let Some(timeout_ms) = parse_var(&lookup, "SWITCH_READ_TIMEOUT_MS")? {
        config.server.read_timeout_ms = Some(timeout_ms);
    }
    if let Some(retries) = parse_var(&lookup, "SWITCH_MAX_RETRIES")? {
        config.network.max_retries = retries;
    }
    config.sanitize();

    let mut simulation = SimulationConfig::default();
    if let Some(drops) = parse_var(&lookup, "SWITCH_SIM_DROPS")? {
        simulation.drops = drops;
    }
    if let Some(address) = parse_var(&lookup, "SWITCH_SIM_ADDRESS")? {
        simulation.address = address;
    }

    Ok((config, simulation))
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid {key}=`{raw}`: {err}")),
    }
}

impl SimulatedNetwork {
    fn deliver(&self, event: NetworkEvent) {
        let handler = {
            let Ok(handlers) = self.handlers.lock() else {
                warn!("simulated network handlers poisoned; dropping {event:?}");
                return;
            };
            match event {
                NetworkEvent::AddressAssigned(_) => handlers.address.clone(),
                _ => handlers.station.clone(),
            }
        };

        match handler {
            Some(handler) => match handler.lock() {
                Ok(mut handler) => (handler.as_mut())(event),
                Err(_) => warn!("simulated handler poisoned; dropping {event:?}"),
            },
            None => warn!("no handler registered for {event:?}"),
        }
    }

    fn register<F>(&self, slot: HandlerSlot, handler: F) -> Result<SimulatedSubscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        let mut handlers = self.handlers.lock().map_err(|_| AttachError::Poisoned)?;
        let handler: Handler = Arc::new(Mutex::new(Box::new(handler)));
        match slot {
            HandlerSlot::Station => handlers.station = Some(handler),
            HandlerSlot::Address => handlers.address = Some(handler),
        }

        Ok(SimulatedSubscription {
            network: self.clone(),
            slot,
        })
    }
}

impl NotificationSource for SimulatedNetwork {
    type Subscription = SimulatedSubscription;

    fn subscribe_station<F>(&self, handler: F) -> Result<SimulatedSubscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        self.register(HandlerSlot::Station, handler)
    }

    fn subscribe_address<F>(&self, handler: F) -> Result<SimulatedSubscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        self.register(HandlerSlot::Address, handler)
    }
}

impl Drop for SimulatedSubscription {
    fn drop(&mut self) {
        if let Ok(mut handlers) = self.network.handlers.lock() {
            match self.slot {
                HandlerSlot::Station => handlers.station = None,
                HandlerSlot::Address => handlers.address = None,
            }
        }
    }
}

impl SimulatedStation {
    fn new(network: &SimulatedNetwork, simulation: &SimulationConfig) -> Self {
        let mut script = VecDeque::from([NetworkEvent::StationStarted]);
        script.extend((0..simulation.drops).map(|_| NetworkEvent::Disconnected));
        script.push_back(NetworkEvent::AddressAssigned(DeviceAddress::new(
            simulation.address,
        )));

        Self {
            network: network.clone(),
            script: Arc::new(Mutex::new(script)),
        }
    }

    fn emit_next(&self) -> Result<(), AttachError> {
        let next = self
            .script
            .lock()
            .map_err(|_| AttachError::Poisoned)?
            .pop_front();

        if let Some(event) = next {
            let network = self.network.clone();
            thread::Builder::new()
                .name("sim-radio".to_string())
                .spawn(move || {
                    thread::sleep(Duration::from_millis(SIM_EVENT_DELAY_MS));
                    network.deliver(event);
                })
                .map_err(|err| AttachError::Station(format!("simulated radio: {err}")))?;
        }
        Ok(())
    }
}

impl StationControl for SimulatedStation {
    fn start(&mut self) -> Result<(), AttachError> {
        info!("simulated station starting");
        self.emit_next()
    }

    fn request(&mut self, request: StationRequest) -> Result<(), AttachError> {
        info!("simulated station request: {request:?}");
        self.emit_next()
    }
}

impl BinaryOutput for LoggedOutput {
    fn state(&self) -> OutputState {
        self.inner.state()
    }

    fn set(&mut self, state: OutputState) -> Result<(), OutputError> {
        let previous = self.inner.state();
        self.inner.set(state)?;
        info!("output {} -> {}", previous.as_str(), state.as_str());
        Ok(())
    }
}
