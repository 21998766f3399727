//! WebSocket connection to a `rosbridge_server`.
//!
//! [`RosbridgeConnection`] owns one socket split into two tasks:
//!
//! 1. a **writer** draining an unbounded channel of outbound frames, so any
//!    caller can send without holding the sink;
//! 2. a **reader** that dispatches inbound frames: `/tf` and `/tf_static`
//!    publications go straight into the shared [`TfBuffer`], and answers to
//!    requests (`service_response`, `action_result`, `status` with an id)
//!    resolve the matching pending `oneshot`.
//!
//! When the socket closes every pending request is dropped, so waiters see a
//! closed channel instead of hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use fidalign_perception::TfBuffer;
use fidalign_types::AlignError;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    InboundFrame, TF_MESSAGE_TYPE, TF_STATIC_TOPIC, TF_TOPIC, call_service_frame,
    parse_frame, parse_tf_message, send_action_goal_frame, subscribe_frame,
};

/// Default rosbridge endpoint.
pub const DEFAULT_ROSBRIDGE_URL: &str = "ws://localhost:9090";

/// Pause between connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<InboundFrame>>>>;

/// A live rosbridge session.
#[derive(Debug)]
pub struct RosbridgeConnection {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    tf: TfBuffer,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RosbridgeConnection {
    /// Connect to `url`, retrying every [`CONNECT_RETRY_INTERVAL`] until
    /// `connect_timeout` has elapsed.
    ///
    /// Inbound transforms are written into `tf`; keep a clone of it to look
    /// them up.
    ///
    /// # Errors
    ///
    /// [`AlignError::Transport`] if no connection could be established.
    pub async fn connect(
        url: &str,
        tf: TfBuffer,
        connect_timeout: Duration,
    ) -> Result<Self, AlignError> {
        let deadline = Instant::now() + connect_timeout;
        let ws = loop {
            match connect_async(url).await {
                Ok((ws, _response)) => break ws,
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(AlignError::Transport(format!(
                            "could not connect to {url}: {e}"
                        )));
                    }
                    warn!(url, error = %e, "rosbridge not reachable, retrying");
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        };
        info!(url, "connected to rosbridge");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // ── Writer ───────────────────────────────────────────────────────────
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        // ── Reader ───────────────────────────────────────────────────────────
        let reader = {
            let tf = tf.clone();
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => dispatch_frame(text.as_str(), &tf, &pending),
                        Ok(Message::Close(_)) => break,
                        Err(e) => {
                            warn!(error = %e, "rosbridge read error");
                            break;
                        }
                        _ => {}
                    }
                }
                closed.store(true, Ordering::SeqCst);
                lock(&pending).clear();
                debug!("rosbridge reader finished");
            })
        };

        Ok(Self {
            url: url.to_string(),
            outbound,
            pending,
            tf,
            closed,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn tf_buffer(&self) -> &TfBuffer {
        &self.tf
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send_frame(&self, frame: Value) -> Result<(), AlignError> {
        if self.is_closed() {
            return Err(AlignError::Transport(format!(
                "connection to {} is closed",
                self.url
            )));
        }
        self.outbound
            .send(Message::Text(frame.to_string().into()))
            .map_err(|_| AlignError::Transport(format!("writer for {} has stopped", self.url)))
    }

    fn register(&self, id: &str) -> oneshot::Receiver<InboundFrame> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.to_string(), tx);
        rx
    }

    fn forget(&self, id: &str) {
        lock(&self.pending).remove(id);
    }

    pub fn subscribe(&self, topic: &str, msg_type: &str) -> Result<(), AlignError> {
        let id = format!("subscribe:{topic}:{}", Uuid::new_v4());
        self.send_frame(subscribe_frame(&id, topic, msg_type))
    }

    /// Subscribe to `/tf` and `/tf_static`.
    pub fn subscribe_tf(&self) -> Result<(), AlignError> {
        self.subscribe(TF_TOPIC, TF_MESSAGE_TYPE)?;
        self.subscribe(TF_STATIC_TOPIC, TF_MESSAGE_TYPE)
    }

    /// Call a ROS service and wait up to `timeout` for its response values.
    ///
    /// # Errors
    ///
    /// [`AlignError::Transport`] on a closed connection, a timeout, or a
    /// response with `result: false`.
    pub async fn call_service(
        &self,
        service: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, AlignError> {
        let id = format!("call_service:{service}:{}", Uuid::new_v4());
        let rx = self.register(&id);
        if let Err(e) = self.send_frame(call_service_frame(&id, service, args)) {
            self.forget(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(InboundFrame::ServiceResponse {
                values,
                result: true,
                ..
            })) => Ok(values),
            Ok(Ok(other)) => Err(AlignError::Transport(format!(
                "service {service} failed: {other:?}"
            ))),
            Ok(Err(_)) => Err(AlignError::Transport(format!(
                "connection closed while calling {service}"
            ))),
            Err(_) => {
                self.forget(&id);
                Err(AlignError::Transport(format!(
                    "service {service} did not answer within {:.1}s",
                    timeout.as_secs_f64()
                )))
            }
        }
    }

    /// Send an action goal under request id `id`.  The returned receiver
    /// yields the `action_result` (or a refusing `status`) for that goal.
    pub fn send_action_goal(
        &self,
        id: &str,
        action: &str,
        action_type: &str,
        args: Value,
    ) -> Result<oneshot::Receiver<InboundFrame>, AlignError> {
        let rx = self.register(id);
        if let Err(e) = self.send_frame(send_action_goal_frame(id, action, action_type, args)) {
            self.forget(id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Close the socket.  Pending requests are dropped.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Message::Close(None));
        self.reader.abort();
        lock(&self.pending).clear();
        info!(url = %self.url, "rosbridge connection closed");
    }
}

fn lock(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<InboundFrame>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Route one inbound text frame.
fn dispatch_frame(text: &str, tf: &TfBuffer, pending: &PendingMap) {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring malformed rosbridge frame");
            return;
        }
    };

    match &frame {
        InboundFrame::Publish { topic, msg } if topic == TF_TOPIC || topic == TF_STATIC_TOPIC => {
            match parse_tf_message(msg, Utc::now()) {
                Ok(transforms) => {
                    let is_static = topic == TF_STATIC_TOPIC;
                    for stamped in transforms {
                        tf.set_transform(stamped, is_static);
                    }
                }
                Err(e) => warn!(topic, error = %e, "bad TFMessage"),
            }
            return;
        }
        InboundFrame::Status { level, msg, .. } if level == "error" || level == "warning" => {
            warn!(status_level = %level, detail = %msg, "rosbridge status");
        }
        _ => {}
    }

    if let Some(id) = frame.request_id() {
        let waiter = lock(pending).remove(id);
        if let Some(tx) = waiter {
            let _ = tx.send(frame);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use fidalign_perception::{Quaternion, StampedTransform, Transform3D, TransformSource, Vec3};
    use serde_json::json;

    fn tf_publish(topic: &str, parent: &str, child: &str, x: f64) -> Value {
        let st = StampedTransform::new(
            parent,
            child,
            Utc::now(),
            Transform3D::new(Vec3::new(x, 0.0, 0.0), Quaternion::identity()),
        );
        json!({ "op": "publish", "topic": topic, "msg": crate::protocol::tf_message(&[st]) })
    }

    #[test]
    fn dispatch_stores_tf_publications() {
        let tf = TfBuffer::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        dispatch_frame(
            &tf_publish(TF_STATIC_TOPIC, "base_link", "camera", 0.2).to_string(),
            &tf,
            &pending,
        );
        dispatch_frame(
            &tf_publish(TF_TOPIC, "camera", "bowl", 1.0).to_string(),
            &tf,
            &pending,
        );
        let t = tf.lookup_transform("base_link", "bowl").unwrap();
        assert!((t.transform.translation.x - 1.2).abs() < 1e-12);
    }

    #[test]
    fn dispatch_resolves_pending_request_by_id() {
        let tf = TfBuffer::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("req-1".to_string(), tx);

        dispatch_frame(
            r#"{"op":"service_response","id":"req-1","values":{"ok":1},"result":true}"#,
            &tf,
            &pending,
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            InboundFrame::ServiceResponse { result: true, .. }
        ));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_ignores_garbage_and_unknown_ids() {
        let tf = TfBuffer::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        dispatch_frame("{{{", &tf, &pending);
        dispatch_frame(
            r#"{"op":"action_result","id":"nobody","status":4,"result":true}"#,
            &tf,
            &pending,
        );
        assert!(tf.frames().is_empty());
    }

    #[tokio::test]
    async fn connect_fails_after_timeout() {
        let err = RosbridgeConnection::connect(
            "ws://127.0.0.1:1",
            TfBuffer::new(),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AlignError::Transport(_)));
    }

    #[tokio::test]
    async fn loopback_tf_and_service_call() {
        let url = loopback::serve(
            vec![tf_publish(TF_STATIC_TOPIC, "base_link", "bowl", 2.0)],
            |req| {
                if req["op"] == "call_service" {
                    vec![json!({
                        "op": "service_response",
                        "id": req["id"],
                        "service": req["service"],
                        "values": { "answer": 42 },
                        "result": true
                    })]
                } else {
                    vec![]
                }
            },
        )
        .await;

        let tf = TfBuffer::new();
        let conn = RosbridgeConnection::connect(&url, tf.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        conn.subscribe_tf().unwrap();

        let values = conn
            .call_service("/echo", json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(values["answer"], 42);

        // The greeting was sent before the service response, so it has been
        // dispatched by now.
        assert!(tf.can_transform("base_link", "bowl"));

        conn.close().await;
        assert!(conn.is_closed());
        assert!(conn.subscribe("/x", "std_msgs/msg/String").is_err());
    }

    #[tokio::test]
    async fn unanswered_service_call_times_out() {
        let url = loopback::serve(vec![], |_| vec![]).await;
        let conn = RosbridgeConnection::connect(&url, TfBuffer::new(), Duration::from_secs(5))
            .await
            .unwrap();
        let err = conn
            .call_service("/silent", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not answer"));
    }
}
