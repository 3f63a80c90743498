use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::command::Command;
use crate::config::DeviceConfig;
use crate::controller::{DeviceController, StateChange};
use crate::device::{DeviceId, DeviceStateView};
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::LogicalState;

pub struct AppState<B: GpioBackend + ?Sized> {
    pub controller: Arc<DeviceController<B>>,
}

impl<B: GpioBackend + ?Sized> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

#[derive(Deserialize)]
struct StatePayload {
    #[serde(alias = "desiredState", alias = "desired_state")]
    state: LogicalState,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<StateChange>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let notice = AppError::InvalidState(format!("Event stream lagged by {n} messages"));
                        if session.text(notice.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + ?Sized + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/devices")
                    .route(web::get().to(list_devices::<B>))
                    .route(web::put().to(reload_devices::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::PUT]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/events")
                    .route(web::get().to(events_ws::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/{device_id}")
                    .route(web::get().to(get_device::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/{device_id}/state")
                    .route(web::get().to(get_state::<B>))
                    .route(web::post().to(set_state::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/{device_id}/toggle")
                    .route(web::post().to(toggle::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/devices/{device_id}/level")
                    .route(web::get().to(probe_level::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/command")
                    .route(web::post().to(command::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_devices<B: GpioBackend + ?Sized + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let devices: Vec<_> = state
        .controller
        .list_devices()
        .iter()
        .map(|d| d.summary())
        .collect();

    Ok(web::Json(devices))
}

async fn reload_devices<B: GpioBackend + ?Sized + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let configs = parse_devices_payload(&body)?;
    let report = state.controller.reload(&configs)?;

    Ok(web::Json(report))
}

async fn get_device<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let device_id = parse_device_id(&req)?;
    let device = state.controller.get_device(device_id)?;

    Ok(web::Json(device))
}

async fn get_state<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let device_id = parse_device_id(&req)?;
    let current = state.controller.query_state(device_id)?;

    Ok(web::Json(DeviceStateView {
        id: DeviceId::from(device_id),
        current_state: current,
    }))
}

async fn set_state<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let device_id = parse_device_id(&req)?;
    let desired = parse_state_payload(&body)?;
    let device = state.controller.set_state(device_id, desired)?;

    Ok(web::Json(device.state_view()))
}

async fn toggle<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let device_id = parse_device_id(&req)?;
    let device = state.controller.toggle(device_id)?;

    Ok(web::Json(device.state_view()))
}

async fn probe_level<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let device_id = parse_device_id(&req)?;
    let probe = state.controller.probe(device_id)?;

    Ok(web::Json(probe))
}

async fn command<B: GpioBackend + ?Sized + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty command payload".into()));
    }
    let command: Command = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid command payload: {e}")))?;
    let reply = command.execute(state.controller.as_ref())?;

    Ok(web::Json(reply))
}

async fn events_ws<B: GpioBackend + ?Sized + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.controller.subscribe();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::InvalidValue(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_device_id(req: &HttpRequest) -> Result<&str, AppError> {
    req.match_info()
        .get("device_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::InvalidValue("Missing device id".into()))
}

/// Accepts `{"state": "on"}` or a bare `on`/`off` body.
fn parse_state_payload(body: &[u8]) -> Result<LogicalState, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty state payload".into()));
    }

    if let Ok(payload) = serde_json::from_slice::<StatePayload>(body) {
        return Ok(payload.state);
    }
    match std::str::from_utf8(body) {
        Ok(text) => text
            .trim()
            .trim_matches('"')
            .parse::<LogicalState>()
            .map_err(|_| AppError::InvalidValue("State must be 'on' or 'off'".into())),
        _ => Err(AppError::InvalidValue(
            "State payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_devices_payload(body: &[u8]) -> Result<Vec<DeviceConfig>, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty devices payload".into()));
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid devices payload: {e}")))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
