mod common;

use common::{DemoCodec, DrawText, FillRect, Restore, Save, SetFillColor, DEFAULT_SOCKET_PATH};
use item_buffer::{to_wire, ItemBuffer, SharedMemoryClient};
use log::{error, info};
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();
    let socket_path = std::env::args()
        .nth(1)
        .unwrap_or(DEFAULT_SOCKET_PATH.to_string());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("Should install ctrl-c handler");
    }

    let client = Arc::new(SharedMemoryClient::new("display_list", 4096, DemoCodec));
    let mut buffer = ItemBuffer::new();
    buffer.set_writing_client(Some(client.clone()));
    for row in 0..32 {
        buffer.append(Save);
        buffer.append(SetFillColor {
            rgba: [row as u8 * 8, 0, 255 - row as u8 * 8, 255],
        });
        buffer.append(FillRect {
            rect: [0.0, row as f32 * 10.0, 100.0, 10.0],
        });
        buffer.append(DrawText {
            origin: [4.0, row as f32 * 10.0 + 8.0],
            text: format!("row {}", row),
        });
        buffer.append(Restore);
    }
    info!(
        "Recorded {} bytes in {} segments",
        buffer.size_in_bytes(),
        buffer.segment_count()
    );

    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).expect("Should bind socket");
    listener
        .set_nonblocking(true)
        .expect("Should set nonblocking");

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let sent = stream
                    .set_nonblocking(false)
                    .map_err(item_buffer::Error::from)
                    .and_then(|_| to_wire(&buffer, client.uid()))
                    .and_then(|message| message.send(&stream));
                match sent {
                    Ok(()) => info!("Sent display list to subscriber"),
                    Err(err) => error!("Failed to send display list: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                error!("Accept failed: {}", err);
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
}
