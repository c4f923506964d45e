//! Request/reply server: newline-delimited JSON frames over TCP.
//!
//! The network simulator connects, sends `sim_init`, any number of
//! `channel_state_request`s and finally `sim_close`. Every frame gets exactly
//! one reply frame. A malformed frame or a rejected request ends the server
//! with an error.

use anyhow::{Context, bail};
use log::{debug, info};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use super::config::ServerConfig;
use super::messages::Inbound;
use crate::simulation::propagation::SceneProvider;
use crate::simulation::session::SessionController;

/// Bind the configured address and serve jobs until `single-run` stops us.
pub fn run(config: &ServerConfig, provider: &dyn SceneProvider) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind_address).with_context(|| format!("Failed to bind {}", config.bind_address))?;
    serve(listener, config, provider)
}

/// Accept clients on `listener`, one session per connection.
pub fn serve(listener: TcpListener, config: &ServerConfig, provider: &dyn SceneProvider) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr().context("Listener has no local address")?);

    for stream in listener.incoming() {
        let stream = stream.context("Failed to accept connection")?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        info!("Accepted job from {}", peer);

        let reader = BufReader::new(stream.try_clone().context("Failed to clone client stream")?);
        let mut writer = stream;
        let mut controller = SessionController::new(provider, config.session_defaults());
        serve_session(&mut controller, reader, &mut writer).with_context(|| format!("Session with {} failed", peer))?;

        if config.single_run {
            info!("Single-run mode, shutting down");
            break;
        }
        info!("Waiting for the next job");
    }
    Ok(())
}

/// Serve one session until `sim_close` has been acknowledged.
pub fn serve_session<R: BufRead, W: Write>(controller: &mut SessionController<'_>, reader: R, writer: &mut W) -> anyhow::Result<()> {
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read frame")?;
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        let message: Inbound = serde_json::from_str(frame).with_context(|| format!("Malformed frame {}", line_no + 1))?;
        debug!("Frame {}: {}", line_no + 1, frame_kind(&message));
        let closing = matches!(message, Inbound::SimClose);

        let reply = controller.handle(message)?;
        let mut encoded = serde_json::to_string(&reply).context("Failed to encode reply")?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).context("Failed to send reply")?;
        writer.flush().context("Failed to flush reply")?;

        if closing {
            return Ok(());
        }
    }
    bail!("Client disconnected before sim_close")
}

fn frame_kind(message: &Inbound) -> &'static str {
    match message {
        Inbound::SimInit(_) => "sim_init",
        Inbound::ChannelStateRequest(_) => "channel_state_request",
        Inbound::SimClose => "sim_close",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::messages::Outbound;
    use crate::simulation::geometry::SceneGeometry;
    use crate::simulation::propagation::{GeometricEngine, OpenedScene, PropagationError};
    use crate::simulation::session::{SessionDefaults, SessionError};
    use std::io::Cursor;
    use std::net::TcpStream;
    use std::thread;

    struct FreeSpace;

    impl SceneProvider for FreeSpace {
        fn open(&self, _scene_id: &str) -> Result<OpenedScene, PropagationError> {
            Ok(OpenedScene {
                engine: Box::new(GeometricEngine::new(SceneGeometry::default(), 0.7)),
                geometry: Box::new(SceneGeometry::default()),
            })
        }
    }

    const INIT: &str = r#"{"sim_init": {"scene": "free.json", "mode": 2, "frequency": 5210.0, "channel_bw": 20.0, "fft_size": 16, "subcarrier_spacing": 1250000.0, "min_coherence_time_ms": 1000, "seed": 3, "nodes": [{"id": 0, "constant_position_model": {"position": {"x": 0.0, "y": 0.0, "z": 1.0}}}, {"id": 1, "constant_position_model": {"position": {"x": 15.0, "y": 0.0, "z": 1.0}}}, {"id": 2, "constant_position_model": {"position": {"x": 0.0, "y": 30.0, "z": 1.0}}}]}}"#;
    const REQUEST: &str = r#"{"channel_state_request": {"tx_node": 0, "rx_node": 2, "time": 1000}}"#;

    fn replies(output: &[u8]) -> Vec<Outbound> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn one_reply_per_request_until_close() {
        let input = format!("{}\n\n{}\n\"sim_close\"\n{}\n", INIT, REQUEST, REQUEST);
        let mut output = Vec::new();
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        serve_session(&mut controller, Cursor::new(input), &mut output).unwrap();

        let replies = replies(&output);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], Outbound::SimAck);
        let Outbound::ChannelStateResponse(response) = &replies[1] else {
            panic!("expected channel state response");
        };
        let ids: Vec<u32> = response.csi[0].rx_nodes.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(replies[2], Outbound::SimAck);
        assert!(controller.is_closed());
    }

    #[test]
    fn malformed_frame_is_fatal() {
        let input = format!("{}\n{{\"sim_restart\": {{}}}}\n", INIT);
        let mut output = Vec::new();
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        let err = serve_session(&mut controller, Cursor::new(input), &mut output).unwrap_err();
        assert!(err.to_string().contains("Malformed frame 2"));
        assert_eq!(replies(&output), vec![Outbound::SimAck]);
    }

    #[test]
    fn request_before_init_is_fatal() {
        let mut output = Vec::new();
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        let err = serve_session(&mut controller, Cursor::new(format!("{}\n", REQUEST)), &mut output).unwrap_err();
        assert!(matches!(err.downcast_ref::<SessionError>(), Some(SessionError::NotInitialized)));
        assert!(output.is_empty());
    }

    #[test]
    fn disconnect_without_close_is_an_error() {
        let mut output = Vec::new();
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        assert!(serve_session(&mut controller, Cursor::new(format!("{}\n", INIT)), &mut output).is_err());
    }

    #[test]
    fn tcp_single_run_serves_one_job() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let config = ServerConfig {
            single_run: true,
            ..ServerConfig::default()
        };
        let server = thread::spawn(move || serve(listener, &config, &FreeSpace));

        let mut client = TcpStream::connect(address).unwrap();
        write!(client, "{}\n{}\n\"sim_close\"\n", INIT, REQUEST).unwrap();
        let mut lines = BufReader::new(client.try_clone().unwrap()).lines();
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(serde_json::from_str::<Outbound>(&lines.next().unwrap().unwrap()).unwrap());
        }
        assert_eq!(received[0], Outbound::SimAck);
        assert!(matches!(received[1], Outbound::ChannelStateResponse(_)));
        assert_eq!(received[2], Outbound::SimAck);

        server.join().unwrap().unwrap();
    }
}
