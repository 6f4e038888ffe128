mod common;

use common::{registry, Canvas, DemoCodec, DEFAULT_SOCKET_PATH};
use item_buffer::{from_wire, WireMessage};
use log::{error, info, warn};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();
    let socket_path = std::env::args()
        .nth(1)
        .unwrap_or(DEFAULT_SOCKET_PATH.to_string());

    let stream = UnixStream::connect(&socket_path).expect("Should connect to publisher");
    stream
        .set_read_timeout(Some(Duration::new(5, 0)))
        .expect("Set timeout should succeed");

    let message = match WireMessage::recv(&stream) {
        Ok(Some(message)) => message,
        Ok(None) => {
            warn!("Publisher hung up before sending anything");
            return;
        }
        Err(err) => {
            error!("Failed to receive display list: {}", err);
            return;
        }
    };

    // the publisher records with the same item types as common::registry()
    let (uid, mut buffer) = match unsafe { from_wire(message) } {
        Ok(received) => received,
        Err(err) => {
            error!("Failed to map display list: {}", err);
            return;
        }
    };
    buffer.set_reading_client(Some(Arc::new(DemoCodec)));

    let mut canvas = Canvas::default();
    match buffer.replay(&registry(), &mut canvas) {
        Ok(count) => info!("Replayed {} items from {:x}", count, uid),
        Err(err) => error!("Replay of {:x} stopped: {}", uid, err),
    }
}
