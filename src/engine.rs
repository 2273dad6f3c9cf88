//! The Engine: a process-wide singleton background thread that owns the
//! `curl::multi::Multi` transfer multiplexer and mirrors its interest
//! into a [`Poller`]. See SPEC_FULL.md §4.4 and §9 for the design this
//! module implements.
//!
//! **Thread-discipline invariant (I3).** `Multi`'s state (attach/detach,
//! `action`, `messages`, the socket/timer callbacks) is touched only from
//! `run_loop`, which runs on the single background thread spawned by
//! [`Engine::global`]. The socket- and timer-interest callbacks curl
//! invokes are always invoked synchronously from inside `Multi::action`,
//! which is itself only ever called from `run_loop` — so they also run on
//! the Engine thread, and `socket_bindings`/`in_flight` need no locking
//! beyond the `RefCell`s used to appease the borrow checker around the
//! callback closures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use curl::multi::{Easy2Handle, Events, Message, Multi, Socket};
use once_cell::sync::OnceCell;
use slab::Slab;

use crate::error::{EngineError, ErrorKind};
use crate::poller::{Poller, ReadyEvent, TIMER_TOKEN, WAKE_TOKEN};
use crate::ready::Ready;
use crate::request::{RequestSpec, TransferHandler, TransferRequest};
use crate::response::Response;
use crate::token::Token;

/// CURL_SOCKET_TIMEOUT: the sentinel socket passed to `action` to drive
/// timeout processing instead of a real fd's readiness (§4.4's loop).
const CURL_SOCKET_TIMEOUT: Socket = -1;

/// Mirror of the multiplexer's interest in one socket (§3).
struct SocketBinding {
    fd: RawFd,
    mask: Ready,
}

/// One attached transfer: the handle curl is driving, plus enough of the
/// original request to publish a `Response` on completion.
struct InFlightEntry {
    handle: Easy2Handle<TransferHandler>,
    url: String,
    result_slot: Arc<crate::request::OneShot<Response>>,
}

struct EngineState {
    poller: Poller,
    multi: Multi,
    // Keyed by (slab key + 1); 0 means "not yet assigned" in curl's
    // socket userp, see `on_socket_event`.
    socket_bindings: RefCell<Slab<SocketBinding>>,
    in_flight: RefCell<Slab<InFlightEntry>>,
    pending: Mutex<VecDeque<TransferRequest>>,
    still_running: AtomicU32,
    stopping: AtomicBool,
}

// SAFETY: `multi`, `socket_bindings` and `in_flight` are mutated only
// from the Engine's background thread (I3); `pending` is guarded by its
// own Mutex for cross-thread submission. The RefCells never alias across
// threads because nothing but the Engine thread ever borrows them.
unsafe impl Send for EngineState {}
unsafe impl Sync for EngineState {}

impl EngineState {
    fn on_socket_event(&self, socket: Socket, events: curl::multi::SocketEvents, token: usize) {
        if events.remove() {
            if token != 0 {
                let key = token - 1;
                let mut bindings = self.socket_bindings.borrow_mut();
                if bindings.contains(key) {
                    let binding = bindings.remove(key);
                    drop(bindings);
                    if let Err(e) = self.poller.remove(binding.fd) {
                        log::warn!("failed to remove fd {} from poller: {}", binding.fd, e);
                    }
                }
            }
            return;
        }

        let mut mask = Ready::empty();
        if events.input() {
            mask.insert(Ready::readable());
        }
        if events.output() {
            mask.insert(Ready::writable());
        }

        let fd = socket as RawFd;

        if token == 0 {
            let key = self
                .socket_bindings
                .borrow_mut()
                .insert(SocketBinding { fd, mask });

            if let Err(e) = self.poller.add(fd, Token(key), mask) {
                log::warn!("failed to register fd {} with poller: {}", fd, e);
                return;
            }

            if let Err(e) = self.multi.assign(socket, key + 1) {
                log::warn!("failed to assign socket userp for fd {}: {}", fd, e);
            }
        } else {
            let key = token - 1;
            if let Some(binding) = self.socket_bindings.borrow_mut().get_mut(key) {
                binding.mask = mask;
            }

            if let Err(e) = self.poller.modify(fd, Token(key), mask) {
                log::warn!("failed to modify fd {} in poller: {}", fd, e);
            }
        }
    }

    fn on_timer_event(&self, timeout_ms: i32) -> bool {
        let ms = if timeout_ms < 0 { -1 } else { timeout_ms as i64 };
        if let Err(e) = self.poller.arm_timer(ms) {
            log::warn!("failed to arm timer: {}", e);
        }
        true
    }

    fn step(&self, socket: Socket, action: i32) {
        let mut events = Events::new();
        events.input(action & 1 != 0);
        events.output(action & 2 != 0);

        match self.multi.action(socket, &events) {
            Ok(running) => self.still_running.store(running, Ordering::Relaxed),
            Err(e) => log::warn!("multi action failed: {}", e),
        }
    }

    /// §4.4: pop every pending submission, attach it to the multiplexer,
    /// and move its ownership into `in_flight`. The only place handles
    /// are attached.
    fn attach_pending(&self) {
        let drained: Vec<TransferRequest> = {
            let mut queue = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            queue.drain(..).collect()
        };

        for request in drained {
            let TransferRequest {
                easy,
                url,
                result_slot,
            } = request;

            match self.multi.add2(easy) {
                Ok(handle) => {
                    let mut in_flight = self.in_flight.borrow_mut();
                    let key = in_flight.insert(InFlightEntry {
                        handle,
                        url,
                        result_slot,
                    });

                    if let Err(e) = in_flight[key].handle.set_token(key) {
                        log::warn!("failed to set transfer token: {}", e);
                    }
                }
                Err(e) => {
                    log::warn!("failed to attach transfer for {}: {}", url, e);
                    result_slot.send(Response::failure(
                        url,
                        ErrorKind::TransportInit,
                        e.to_string(),
                    ));
                }
            }
        }
    }

    /// §4.4: read completion messages, translate each to a `Response`,
    /// publish it, then detach the handle. The only place handles are
    /// detached.
    fn drain_completions(&self) {
        let mut finished: Vec<(usize, Option<Result<(), curl::Error>>)> = Vec::new();

        self.multi.messages(|message: &Message| {
            if let Ok(token) = message.token() {
                finished.push((token, message.result()));
            }
        });

        for (token, result) in finished {
            let entry = {
                let mut in_flight = self.in_flight.borrow_mut();
                if !in_flight.contains(token) {
                    continue;
                }
                in_flight.remove(token)
            };

            let response = match result {
                Some(Ok(())) => {
                    let status = entry.handle.response_code().unwrap_or(0);
                    let body = entry.handle.get_ref().body().to_vec();
                    let headers = entry.handle.get_ref().last_group();
                    Response::success(entry.url.clone(), status, body, headers)
                }
                Some(Err(curl_err)) => {
                    let kind = ErrorKind::from_curl_error(&curl_err);
                    let message = last_status_line(&entry).unwrap_or_else(|| curl_err.to_string());
                    Response::failure(entry.url.clone(), kind, message)
                }
                None => Response::failure(
                    entry.url.clone(),
                    ErrorKind::Network,
                    "transfer completed without a result".to_string(),
                ),
            };

            entry.result_slot.send(response);

            if let Err(e) = self.multi.remove2(entry.handle) {
                log::warn!("failed to detach completed transfer: {}", e);
            }
        }
    }
}

fn last_status_line(entry: &InFlightEntry) -> Option<String> {
    entry
        .handle
        .get_ref()
        .last_group()
        .iter()
        .find(|(k, _)| k == crate::request::RESPONSE_STATUS_KEY)
        .map(|(_, v)| v.clone())
}

/// The shared multiplexed HTTP engine. Construct once via [`Engine::global`];
/// every `perform` call shares the same background thread and `Multi`.
pub struct Engine {
    state: Arc<EngineState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL: OnceCell<Engine> = OnceCell::new();

impl Engine {
    /// Lazily initialise the process-wide Engine singleton (§3,
    /// `GlobalState`). Never torn down implicitly; see §9 and
    /// [`Engine::shutdown`].
    pub fn global() -> Result<&'static Engine, EngineError> {
        GLOBAL.get_or_try_init(Engine::start)
    }

    fn start() -> Result<Engine, EngineError> {
        curl_global_init();

        let poller = Poller::new().map_err(EngineError::PollerInit)?;
        let multi = Multi::new();

        let state = Arc::new(EngineState {
            poller,
            multi,
            socket_bindings: RefCell::new(Slab::new()),
            in_flight: RefCell::new(Slab::new()),
            pending: Mutex::new(VecDeque::new()),
            still_running: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
        });

        let socket_state = state.clone();
        state
            .multi
            .socket_function(move |socket, events, token| {
                socket_state.on_socket_event(socket, events, token);
            })
            .map_err(EngineError::TransportInit)?;

        let timer_state = state.clone();
        state
            .multi
            .timer_function(move |timeout_ms| timer_state.on_timer_event(timeout_ms))
            .map_err(EngineError::TransportInit)?;

        let loop_state = state.clone();
        let thread = thread::Builder::new()
            .name("curl-engine".to_string())
            .spawn(move || run_loop(loop_state))
            .map_err(EngineError::ThreadSpawn)?;

        Ok(Engine {
            state,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// §4.4 `perform`: enqueue, poke, block on the one-shot channel.
    pub fn submit(&self, spec: RequestSpec) -> Result<Response, EngineError> {
        let request = TransferRequest::new(spec).map_err(EngineError::RequestInit)?;
        let slot = request.result_slot();

        {
            let mut queue = self
                .state
                .pending
                .lock()
                .map_err(|_| EngineError::QueuePoisoned)?;
            queue.push_back(request);
        }

        self.state
            .poller
            .poke_wakeup()
            .map_err(EngineError::Poller)?;

        Ok(slot.recv())
    }

    /// Explicit, opt-in shutdown: signal the loop to stop and join the
    /// thread. Not called implicitly anywhere; omitting it is the
    /// documented default (§9) and sockets/thread are reclaimed by
    /// process exit instead.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.state.stopping.store(true, Ordering::SeqCst);
        self.state
            .poller
            .poke_wakeup()
            .map_err(EngineError::Poller)?;

        let mut guard = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn run_loop(state: Arc<EngineState>) {
    let mut events: Vec<ReadyEvent> = Vec::with_capacity(1024);

    loop {
        if let Err(e) = state.poller.wait(&mut events, None) {
            log::error!("poller wait failed, engine thread exiting: {}", e);
            return;
        }

        for event in &events {
            if event.token == TIMER_TOKEN {
                let _ = state.poller.drain_timer();
                state.step(CURL_SOCKET_TIMEOUT, 0);
                state.drain_completions();
                if state.still_running.load(Ordering::Relaxed) == 0 {
                    let _ = state.poller.arm_timer(-1);
                }
            } else if event.token == WAKE_TOKEN {
                let _ = state.poller.drain_wakeup();

                if state.stopping.load(Ordering::SeqCst) {
                    return;
                }

                state.attach_pending();
            } else {
                let fd = state
                    .socket_bindings
                    .borrow()
                    .get(event.token.0)
                    .map(|b| b.fd);

                if let Some(fd) = fd {
                    let mut action = 0;
                    if event.readiness.is_readable() {
                        action |= 1;
                    }
                    if event.readiness.is_writable() {
                        action |= 2;
                    }
                    state.step(fd as Socket, action);
                    state.drain_completions();
                }
            }
        }
    }
}

fn curl_global_init() {
    // Performed exactly once per process, guarded by `Once`, and
    // deliberately never paired with `curl_global_cleanup` — see
    // DESIGN.md's Open Question (a). `curl::init()` carries its own
    // internal once-guard; calling it here documents the intent at the
    // Engine's own entry point rather than relying on that being
    // incidental.
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(curl::init);
}
