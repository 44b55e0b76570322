// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use actix::prelude::*;
use actix_web_actors::ws;
use railpos::broadcast::{Broadcaster, PositionFeed, SubscriberId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    RequestUpdate,
}

pub struct PositionWebSocket {
    hb: Instant,
    broadcaster: Arc<Broadcaster>,
    subscriber_id: Option<SubscriberId>,
}

impl PositionWebSocket {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            hb: Instant::now(),
            broadcaster,
            subscriber_id: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::debug!(id = ?act.subscriber_id, "websocket heartbeat timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => ctx.text(r#"{"type":"pong"}"#),
            Ok(ClientMessage::RequestUpdate) => {
                if let Some(id) = self.subscriber_id {
                    if let Err(e) = self.broadcaster.resend_initial(id) {
                        tracing::debug!(id, error = %e, "could not resend initial state");
                    }
                }
            }
            Err(_) => {}
        }
    }
}

impl Actor for PositionWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let recipient: Recipient<PositionFeed> = ctx.address().recipient();
        self.subscriber_id = self.broadcaster.subscribe(Arc::new(recipient));

        if self.subscriber_id.is_none() {
            ctx.stop();
        }
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let Some(id) = self.subscriber_id.take() {
            self.broadcaster.unsubscribe(id);
        }
        Running::Stop
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PositionWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::debug!(error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => (),
        }
    }
}

impl Handler<PositionFeed> for PositionWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PositionFeed, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_string());
    }
}
