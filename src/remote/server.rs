//! Executor endpoint thread loops.
//!
//! Three thread roles, as in the daemon it instruments:
//! - Acceptor - accepts connections, spawns a handler thread per client
//! - State thread - owns the handler registry, executes calls sequentially
//! - Client handlers - frame requests/replies, relay over channels
//!
//! The state thread is the serialization point: two forwarded calls never
//! run concurrently against the same endpoint.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};

use crate::remote::executor::HandlerRegistry;
use crate::remote::proto::{
    FailurePayload, ProtoError, Reply, Request, decode_request, encode_reply, encode_request,
};

/// Message sent from client handler threads to the state thread.
struct CallJob {
    request: Request,
    respond: Sender<Reply>,
}

/// A bound, running executor endpoint.
///
/// Stops on a `shutdown` request, on [`shutdown`](Self::shutdown), or when
/// dropped; the socket file is removed on the way out.
pub struct ExecutorServer {
    socket: PathBuf,
    stop: Arc<AtomicBool>,
    state: Option<JoinHandle<()>>,
    acceptor: Option<JoinHandle<()>>,
}

impl ExecutorServer {
    /// Bind the socket and start the endpoint threads.
    pub fn bind(socket: impl Into<PathBuf>, registry: HandlerRegistry) -> Result<Self, ProtoError> {
        let socket = socket.into();
        if socket.exists() {
            // Stale socket from a dead endpoint.
            fs::remove_file(&socket)?;
        }
        let listener = UnixListener::bind(&socket)?;

        let (req_tx, req_rx) = crossbeam::channel::unbounded::<CallJob>();
        let stop = Arc::new(AtomicBool::new(false));

        let registry = Arc::new(registry);
        let state_socket = socket.clone();
        let state_stop = Arc::clone(&stop);
        let state = thread::Builder::new()
            .name("tether-state".to_string())
            .spawn(move || run_state_loop(&registry, &req_rx, &state_stop, &state_socket))
            .map_err(ProtoError::Io)?;

        let acceptor_stop = Arc::clone(&stop);
        let acceptor = thread::Builder::new()
            .name("tether-acceptor".to_string())
            .spawn(move || run_acceptor(listener, req_tx, &acceptor_stop))
            .map_err(ProtoError::Io)?;

        tracing::info!(socket = %socket.display(), "executor endpoint listening");

        Ok(Self {
            socket,
            stop,
            state: Some(state),
            acceptor: Some(acceptor),
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Block until the endpoint stops (a `shutdown` request arrives).
    pub fn join(mut self) {
        self.join_threads();
    }

    /// Stop the endpoint and wait for its threads.
    pub fn shutdown(mut self) -> Result<(), ProtoError> {
        self.stop_impl()
    }

    fn stop_impl(&mut self) -> Result<(), ProtoError> {
        if !self.stop.load(Ordering::SeqCst) {
            request_shutdown(&self.socket)?;
        }
        self.join_threads();
        Ok(())
    }

    fn join_threads(&mut self) {
        if let Some(handle) = self.state.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        let _ = fs::remove_file(&self.socket);
    }
}

impl Drop for ExecutorServer {
    fn drop(&mut self) {
        if self.state.is_some() || self.acceptor.is_some() {
            let _ = self.stop_impl();
        }
    }
}

fn request_shutdown(socket: &Path) -> Result<(), ProtoError> {
    let mut stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(&encode_request(&Request::Shutdown)?)?;
    stream.flush()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let _ = reader.read_line(&mut line);
    Ok(())
}

/// Run the state thread loop.
///
/// All call execution goes through here, one request at a time.
fn run_state_loop(
    registry: &HandlerRegistry,
    req_rx: &Receiver<CallJob>,
    stop: &AtomicBool,
    socket: &Path,
) {
    loop {
        match req_rx.recv() {
            Ok(CallJob { request, respond }) => match request {
                Request::Ping => {
                    let _ = respond.send(Reply::Pong);
                }
                Request::Shutdown => {
                    let _ = respond.send(Reply::ShuttingDown);
                    break;
                }
                Request::Call {
                    call_id,
                    method,
                    argc: _,
                    args,
                } => {
                    let reply = registry.execute(call_id, &method, &args);
                    let _ = respond.send(reply);
                }
            },
            Err(_) => {
                // Acceptor and all clients gone.
                break;
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    // Wake the acceptor out of its blocking accept.
    let _ = UnixStream::connect(socket);
    tracing::info!(socket = %socket.display(), "executor endpoint stopped");
}

/// Accept connections and spawn a handler thread for each.
fn run_acceptor(listener: UnixListener, req_tx: Sender<CallJob>, stop: &AtomicBool) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let req_tx = req_tx.clone();
                thread::spawn(move || handle_client(stream, &req_tx));
            }
            Err(e) => {
                tracing::warn!("accept error: {e}");
            }
        }
    }
}

/// Handle a single client connection.
///
/// Reads requests, relays them to the state thread, writes replies back.
fn handle_client(stream: UnixStream, req_tx: &Sender<CallJob>) {
    let reader = match stream.try_clone() {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("failed to clone client stream: {e}");
            return;
        }
    };
    let reader = BufReader::new(reader);
    let mut writer = stream;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break, // Client disconnected
        };

        if line.trim().is_empty() {
            continue;
        }

        let request = match decode_request(&line) {
            Ok(r) => r,
            Err(e) => {
                let reply = Reply::Err {
                    call_id: None,
                    error: FailurePayload::new(e.code().to_string(), e.to_string()),
                };
                if write_reply(&mut writer, &reply).is_err() {
                    break;
                }
                continue;
            }
        };

        let (respond_tx, respond_rx) = crossbeam::channel::bounded(1);
        if req_tx
            .send(CallJob {
                request,
                respond: respond_tx,
            })
            .is_err()
        {
            break; // State thread died
        }

        let reply = match respond_rx.recv() {
            Ok(r) => r,
            Err(_) => break, // State thread died
        };

        let shutting_down = matches!(reply, Reply::ShuttingDown);
        if write_reply(&mut writer, &reply).is_err() {
            break;
        }
        if shutting_down {
            break;
        }
    }
}

fn write_reply(writer: &mut UnixStream, reply: &Reply) -> Result<(), ProtoError> {
    let bytes = encode_reply(reply)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
