//! WebSocket Transport
//!
//! Observer connections speak compact JSON frames over a websocket.
//!
//! ## Architecture
//!
//! - **Handler**: upgrades the request and pumps frames between socket and hub
//! - **Messages**: client and server frame formats
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8888/rosboard/v1');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify(["s", {topicName: "/imu", maxUpdateRate: 10}]));
//! };
//!
//! ws.onmessage = (event) => {
//!   const [tag, payload] = JSON.parse(event.data);
//!   if (tag === "p") ws.send(JSON.stringify(["q", {s: payload.s}]));
//! };
//! ```

mod handler;
mod messages;

pub use handler::websocket_handler;
pub use messages::{
    ClientFrame, FrameError, ServerFrame, MSG_MSG, MSG_PING, MSG_PONG, MSG_PUB, MSG_SUB,
    MSG_SYSTEM, MSG_TOPICS, MSG_UNSUB, SEQ_KEY,
};
