use core::convert::TryInto;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    netif::IpEvent,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::{esp, esp_wifi_connect, esp_wifi_start},
    wifi::{EspWifi, WifiEvent},
};
use log::{info, warn};

use switch_common::{
    config::NetworkConfig, ActionDispatcher, AttachError, BinaryOutput, CommandServer,
    DeviceAddress, NetworkAttachment, NetworkEvent, NotificationSource, OutputConfig, OutputError,
    OutputState, StationControl, StationRequest, SwitchConfig,
};

const NVS_NAMESPACE: &str = "switch";
const NVS_RUNTIME_KEY: &str = "runtime_json";

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

struct SystemNotifications {
    sys_loop: EspSystemEventLoop,
}

// The EspWifi handle stays owned by run(); handlers only need the raw calls.
#[derive(Clone, Copy)]
struct RawStation;

struct GpioOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    gpio: i32,
    active_high: bool,
    state: OutputState,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut config = match nvs_store.load_runtime_config() {
        Ok(Some(config)) => config,
        Ok(None) => {
            info!("no runtime config in NVS; storing defaults");
            let config = SwitchConfig::default();
            if let Err(err) = nvs_store.save_runtime_config(&config) {
                warn!("failed to store default runtime config: {err:#}");
            }
            config
        }
        Err(err) => {
            warn!("failed to load runtime config from NVS: {err:#}");
            SwitchConfig::default()
        }
    };
    ensure_wifi_defaults(&mut config.network);
    config.sanitize();

    info!(
        "config loaded: ssid=`{}`, port={}, gpio={}, read_timeout={:?}",
        config.network.wifi_ssid,
        config.server.port,
        config.output.gpio_pin,
        config.server.read_timeout(),
    );

    let output = GpioOutput::new(&config.output).context("failed to configure output pin")?;

    let Peripherals { modem, .. } = Peripherals::take()?;
    let wifi = configure_station(modem, sys_loop.clone(), nvs_partition, &config.network)
        .context("wifi setup failed")?;

    let notifications = SystemNotifications { sys_loop };
    let address = NetworkAttachment::new(config.network.max_retries)
        .attempt_attach(&notifications, RawStation)
        .context("failed to associate to AP")?;

    let dispatcher = ActionDispatcher::new(address, output);
    let server = CommandServer::bind(&config.server, dispatcher)
        .context("failed to start command server")?;

    // Keep the station up for as long as we serve.
    let _wifi = wifi;
    match server.run() {
        Ok(never) => match never {},
        Err(err) => Err(anyhow::Error::from(err).context("command server stopped")),
    }
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            network.wifi_ssid = ssid.to_string();
        }
    }
    if network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            network.wifi_pass = pass.to_string();
        }
    }
}

fn configure_station(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if !network.has_station_credentials() {
        return Err(anyhow!("wifi ssid not configured"));
    }

    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    info!("station configured for `{}`", network.wifi_ssid);
    Ok(wifi)
}

impl NotificationSource for SystemNotifications {
    type Subscription = EspSubscription<'static, System>;

    fn subscribe_station<F>(&self, mut handler: F) -> Result<Self::Subscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        self.sys_loop
            .subscribe::<WifiEvent, _>(move |event| match event {
                WifiEvent::StaStarted => handler(NetworkEvent::StationStarted),
                WifiEvent::StaDisconnected { .. } => handler(NetworkEvent::Disconnected),
                _ => {}
            })
            .map_err(|err| AttachError::Subscribe {
                class: "wifi",
                reason: err.to_string(),
            })
    }

    fn subscribe_address<F>(&self, mut handler: F) -> Result<Self::Subscription, AttachError>
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        self.sys_loop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    let address = DeviceAddress::from(assignment.ip());
                    info!("station got ip {address}");
                    handler(NetworkEvent::AddressAssigned(address));
                }
            })
            .map_err(|err| AttachError::Subscribe {
                class: "ip",
                reason: err.to_string(),
            })
    }
}

impl StationControl for RawStation {
    fn start(&mut self) -> Result<(), AttachError> {
        esp!(unsafe { esp_wifi_start() })
            .map_err(|err| AttachError::Station(format!("esp_wifi_start: {err}")))
    }

    fn request(&mut self, _request: StationRequest) -> Result<(), AttachError> {
        esp!(unsafe { esp_wifi_connect() })
            .map_err(|err| AttachError::Station(format!("esp_wifi_connect: {err}")))
    }
}

impl GpioOutput {
    fn new(config: &OutputConfig) -> anyhow::Result<Self> {
        let pin = unsafe { PinDriver::output(AnyOutputPin::new(config.gpio_pin)) }
            .with_context(|| format!("GPIO{} unavailable", config.gpio_pin))?;

        let mut output = Self {
            pin,
            gpio: config.gpio_pin,
            active_high: config.active_high,
            state: OutputState::Off,
        };
        output
            .set(OutputState::Off)
            .context("failed to drive output low")?;
        info!("output ready on GPIO{}", config.gpio_pin);
        Ok(output)
    }
}

impl BinaryOutput for GpioOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn set(&mut self, state: OutputState) -> Result<(), OutputError> {
        let drive_high = state.is_on() == self.active_high;
        let result = if drive_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        result.map_err(|err| OutputError::Drive(format!("GPIO{}: {err}", self.gpio)))?;
        self.state = state;
        Ok(())
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<Option<SwitchConfig>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("nvs lock poisoned"))?;
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 1024];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(Some(SwitchConfig::from_json(value)?)),
            None => Ok(None),
        }
    }

    fn save_runtime_config(&self, config: &SwitchConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("nvs lock poisoned"))?;
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = config.to_json()?;
        nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
        Ok(())
    }
}
