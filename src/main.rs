use log::{error, info, warn};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};

use gpiocontrol::{AppConfig, AppError, AppState, DeviceController, Registry};

#[cfg(feature = "hardware-gpio")]
use gpiocontrol::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use gpiocontrol::SimulatedGpioBackend;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GPIOCONTROL_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path).map_err(io::Error::other)?;

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(LibgpiodBackend::new(&config.gpio.chip).map_err(io::Error::other)?)
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            info!("GPIO hardware support not compiled in, using simulated backend");
            Arc::new(
                SimulatedGpioBackend::new(config.gpio.lines)
                    .with_reserved(config.gpio.reserved.iter().copied())
                    .with_history_capacity(config.gpio.write_history_capacity),
            )
        }
    };

    let registry = match Registry::load(&config.devices, backend.as_ref()) {
        Ok(registry) => registry,
        Err(AppError::InvalidConfig(violations)) => {
            for violation in violations.iter() {
                error!("{violation}");
            }
            return Err(io::Error::other(format!(
                "{} invalid device configuration entries in {config_path}",
                violations.len()
            )));
        }
        Err(e) => return Err(io::Error::other(e)),
    };
    info!("Loaded {} devices from {config_path}", registry.len());

    let controller = Arc::new(DeviceController::new(
        backend,
        registry,
        config.broadcast_capacity,
    ));
    let report = controller.startup();
    for failure in &report.failures {
        warn!(
            "Device '{}' ({}) on GPIO{} not initialized [{}]: {}",
            failure.name, failure.id, failure.pin, failure.kind, failure.message
        );
    }

    let app_state = AppState {
        controller: controller.clone(),
    };

    let http_cfg = config.http.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    })
    .client_request_timeout(Duration::from_secs(config.http.timeout));

    let bind_addrs: String;
    let http_cfg = config.http.clone();
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        (None, None) => {
            controller.shutdown();
            return Err(io::Error::other(
                "Config error: either 'unix_socket' or 'host' must be specified",
            ));
        }
    };

    info!("Starting server on {}...", bind_addrs);

    let result = server.run().await;
    controller.shutdown();
    result
}
