//! WiFi station management for the relay
//!
//! Uses esp-wifi 0.14.1 with embassy-net DHCP. Status changes are published
//! through [`crate::net`] so the interpreter can answer `WIF`.

use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController, WifiEvent};
use log::{info, warn};

use crate::{PodError, net};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct WifiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
}

impl<'a> WifiManager<'a> {
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self { controller, stack }
    }

    fn configure(&mut self, ssid: &str, password: &str) -> Result<(), PodError> {
        let client_config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| PodError::Config)?,
            password: password.try_into().map_err(|_| PodError::Config)?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| PodError::Config)
    }

    /// Keep the station associated, publishing every status change
    pub async fn run(&mut self, ssid: &str, password: &str) -> ! {
        if let Err(e) = self.configure(ssid, password) {
            warn!("[WIFI] configuration rejected: {:?}", e);
        }

        loop {
            if !matches!(self.controller.is_started(), Ok(true)) {
                if let Err(e) = self.controller.start_async().await {
                    warn!("[WIFI] start failed: {:?}", e);
                    Timer::after(RETRY_DELAY).await;
                    continue;
                }
            }

            info!("[WIFI] connecting to {}", ssid);
            match self.controller.connect_async().await {
                Ok(()) => {
                    self.stack.wait_config_up().await;
                    self.report_address();
                    net::wifi_connected();

                    self.controller
                        .wait_for_event(WifiEvent::StaDisconnected)
                        .await;
                    net::wifi_disconnected();
                }
                Err(e) => {
                    warn!("[WIFI] connect failed: {:?}", e);
                    net::wifi_disconnected();
                    Timer::after(RETRY_DELAY).await;
                }
            }
        }
    }

    fn report_address(&self) {
        let Some(config) = self.stack.config_v4() else {
            info!("[DHCP] no configuration yet");
            return;
        };
        info!("[DHCP] address {}", config.address);
        if let Some(gateway) = config.gateway {
            info!("[DHCP] gateway {}", gateway);
        }
        for dns in config.dns_servers.iter() {
            info!("[DHCP] dns {}", dns);
        }
    }
}
