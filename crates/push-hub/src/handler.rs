//! HTTP handlers for the push hub

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, OriginalUri, Query, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Json, Response},
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::auth::{resolve_user_id, AuthFn, AuthRequest};
use crate::connection::ChannelSink;
use crate::delivery::{DeliveryRequest, Target};
use crate::error::{Error, Result};
use crate::notify::NotificationKind;
use crate::registry::{ClientHandle, ClientInfo, ClientRegistry, RegistryStats};

/// Shared state for handlers
#[derive(Clone)]
pub struct HubState {
    pub registry: ClientRegistry,
    pub auth: Option<AuthFn>,
    /// Per-client buffer size, in frames
    pub channel_capacity: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Stream connection endpoint
pub async fn open_stream(
    State(state): State<HubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());

    let session_user = match &state.auth {
        Some(auth_fn) => {
            let auth_request = AuthRequest {
                method,
                uri,
                headers,
                requested_user_id: params.user_id.clone(),
                client_ip: client_ip.clone(),
            };
            match auth_fn(auth_request).await {
                Ok(user) => user,
                Err(response) => {
                    tracing::warn!(client_ip = ?client_ip, "Stream connection denied");
                    return response;
                }
            }
        }
        None => None,
    };

    let user_id = resolve_user_id(session_user, params.user_id);
    let (sink, receiver) = ChannelSink::new(state.channel_capacity);
    let handle = state.registry.add_client(sink, user_id);

    tracing::debug!(client_id = handle.id(), client_ip = ?client_ip, "Stream opened");

    let frames = ReceiverStream::new(receiver).map(|frame| Ok::<_, Infallible>(frame.to_string()));
    let stream = ClientStream {
        inner: Box::pin(frames),
        handle: Some(handle),
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Response body that closes its client when the transport drops it
struct ClientStream<S> {
    inner: Pin<Box<S>>,
    handle: Option<ClientHandle>,
}

impl<S> Drop for ClientStream<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(client_id = handle.id(), "Stream closed by transport");
            handle.close();
        }
    }
}

impl<S: Stream> Stream for ClientStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// Send message endpoint
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    pub event: Option<String>,
    pub data: Option<Value>,
    pub target: Option<TargetRequest>,
    pub broadcast: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub client_ids: Vec<String>,
}

impl SendMessageRequest {
    /// Validate the request body and turn it into a delivery
    pub fn into_delivery(self) -> Result<DeliveryRequest> {
        let event_type = self
            .event
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::bad_request("Event and data are required"))?;
        let data = self
            .data
            .ok_or_else(|| Error::bad_request("Event and data are required"))?;

        if event_type.contains(['\n', '\r']) {
            return Err(Error::bad_request("Event name must be a single line"));
        }

        Ok(DeliveryRequest {
            event_type,
            data,
            broadcast: self.broadcast.unwrap_or(false),
            target: self.target.map(|t| Target {
                user_ids: t.user_ids.into_iter().collect(),
                client_ids: t.client_ids.into_iter().collect(),
            }),
        })
    }
}

pub async fn send_message(
    State(state): State<HubState>,
    body: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = body.map_err(|e| Error::bad_request(e.body_text()))?;
    let request = req.into_delivery()?;

    state.registry.send_message(&request);
    Ok(Json(json!({ "success": true })))
}

pub async fn disconnect_all(State(state): State<HubState>) -> Json<Value> {
    state.registry.disconnect_all();
    Json(json!({ "success": true, "message": "All clients disconnected" }))
}

pub async fn get_stats(State(state): State<HubState>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}

pub async fn list_clients(State(state): State<HubState>) -> Json<Vec<ClientInfo>> {
    Json(state.registry.list_clients())
}

// Webhook trigger
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: Option<String>,
    pub message: Option<String>,
}

impl WebhookRequest {
    /// Route the webhook to the matching delivery
    pub fn dispatch(self, registry: &ClientRegistry) -> Result<()> {
        match self.kind.as_str() {
            "broadcast" => {
                let message = self
                    .message
                    .unwrap_or_else(|| "Broadcast message from webhook".to_string());
                registry.broadcast_event(
                    "webhook-event",
                    json!({
                        "type": "broadcast",
                        "message": message,
                        "timestamp": crate::event::timestamp(),
                    }),
                );
            }
            "user-notification" => {
                if let Some(user_id) = self.user_id.filter(|u| !u.is_empty()) {
                    let message = self
                        .message
                        .unwrap_or_else(|| "You have a new notification".to_string());
                    registry.send_notification(
                        &user_id,
                        "Webhook Notification",
                        &message,
                        NotificationKind::Info,
                    );
                }
            }
            other => {
                tracing::debug!(webhook_type = other, "Rejected webhook");
                return Err(Error::bad_request("Invalid webhook type"));
            }
        }
        Ok(())
    }
}

pub async fn webhook(
    State(state): State<HubState>,
    body: std::result::Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = body.map_err(|e| Error::bad_request(e.body_text()))?;
    req.dispatch(&state.registry)?;
    Ok(Json(json!({ "success": true })))
}
