// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use log::{debug, info, warn};
use mtline_crypto::AuthKey;
use mtline_mtproto::{decrypt_message, encrypt_message, service};
use mtline_session::Session;
use mtline_tl::{Cursor, Deserializable, Identifiable, Registry, RemoteCall, Serializable};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use std::{io, mem};

use crate::configuration::Configuration;
use crate::errors::{InvocationError, ReadError, RpcError};
use crate::net::{self, Transport};

/// Generate a "random" unique ID, fit for pings.
pub(crate) fn generate_random_id() -> i64 {
    static LAST_ID: AtomicI64 = AtomicI64::new(0);

    while LAST_ID.load(Ordering::SeqCst) == 0 {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_nanos() as i64;

        if LAST_ID
            .compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            thread::yield_now();
        }
    }

    LAST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A serialized request body, ready to be assigned a message ID and sent.
pub struct Request {
    body: Vec<u8>,
    content_related: bool,
}

impl Request {
    /// Wrap an already-serialized request body. The first four bytes
    /// must be its constructor identifier, as produced by any
    /// [`Serializable`] schema type.
    ///
    /// Requests are content-related by default, which is correct for
    /// every remote procedure call.
    pub fn new(body: Vec<u8>) -> Self {
        assert!(body.len() >= 4);
        Self {
            body,
            content_related: true,
        }
    }

    /// Serialize the given remote call into a request.
    pub fn from_call<C: RemoteCall>(call: &C) -> Self {
        Self::new(call.to_bytes())
    }

    /// Changes whether the request advances the session's sequence
    /// counter. Service messages such as pings do not.
    pub fn content_related(mut self, content_related: bool) -> Self {
        self.content_related = content_related;
        self
    }

    fn constructor_id(&self) -> u32 {
        u32::from_le_bytes([self.body[0], self.body[1], self.body[2], self.body[3]])
    }
}

/// The caller's half of a sent request: a one-shot signal that fires
/// when a terminal reply arrives (or the request is dropped).
pub struct RequestHandle {
    rx: mpsc::Receiver<Result<Vec<u8>, InvocationError>>,
}

impl RequestHandle {
    /// Block until the response body (or error) for this request arrives.
    pub fn wait(&self) -> Result<Vec<u8>, InvocationError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(mpsc::RecvError) => Err(InvocationError::Dropped),
        }
    }

    /// Like [`RequestHandle::wait`], but deserializes the response.
    pub fn wait_for<D: Deserializable>(&self) -> Result<D, InvocationError> {
        let body = self.wait()?;
        D::from_bytes(&body).map_err(|e| InvocationError::Deserialize(e.into()))
    }

    /// Check for the result without blocking.
    pub fn try_wait(&self) -> Option<Result<Vec<u8>, InvocationError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(InvocationError::Dropped)),
        }
    }
}

/// A request that was sent and still awaits its reply.
struct PendingRequest {
    msg_id: i64,
    constructor_id: u32,
    content_related: bool,
    body: Vec<u8>,
    tx: mpsc::Sender<Result<Vec<u8>, InvocationError>>,
}

impl PendingRequest {
    fn complete(self, result: Result<Vec<u8>, InvocationError>) {
        // The caller may have discarded its handle; that's fine.
        drop(self.tx.send(result));
    }
}

/// Everything the producer and consumer sides mutate, under one lock.
struct State {
    session: Session,
    pending: Vec<PendingRequest>,
    pending_ack: Vec<i64>,
}

struct Inner<T: Transport, R: Registry> {
    transport: T,
    registry: R,

    // Immutable copy so decryption can run without taking the lock.
    auth_key: AuthKey,

    state: Mutex<State>,

    /// Every decoded message that does not correlate with a pending
    /// request gets passed to these callbacks. This should only be
    /// updates, although it can actually be any registry value.
    ///
    /// The thread from which these callbacks are called can be any.
    handlers: Mutex<Vec<Box<dyn Fn(&<R as Registry>::Value) + Send>>>,

    constant_read: bool,
    shutdown: AtomicBool,

    /// Used when logging out: the only request that is ever confirmed
    /// through a bare `msgs_ack`.
    logging_out: AtomicBool,
}

/// MTProto sender: sends requests previously serialized by the schema
/// layer through an established transport, matches the server's replies
/// back to them, and keeps the session counters and salt up to date.
///
/// All methods take `&self`; a single instance can be shared across
/// threads. Sending and receiving are independent: either drive
/// [`Sender::receive`] manually, or let [`Configuration::constant_read`]
/// spawn a dedicated read thread on connect.
pub struct Sender<T: Transport, R: Registry> {
    inner: Arc<Inner<T, R>>,
    read_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static, R: Registry + 'static> Sender<T, R> {
    /// Create a new sender over the given transport, using the
    /// parameters from `session` and resolving unknown constructors
    /// through `registry`.
    pub fn new(transport: T, session: Session, registry: R) -> Self {
        Self::with_configuration(transport, session, registry, Configuration::default())
    }

    pub fn with_configuration(
        transport: T,
        session: Session,
        registry: R,
        configuration: Configuration,
    ) -> Self {
        let auth_key = session.auth_key().clone();
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                auth_key,
                state: Mutex::new(State {
                    session,
                    pending: Vec::new(),
                    pending_ack: Vec::new(),
                }),
                handlers: Mutex::new(Vec::new()),
                constant_read: configuration.constant_read,
                shutdown: AtomicBool::new(false),
                logging_out: AtomicBool::new(false),
            }),
            read_thread: Mutex::new(None),
        }
    }

    /// Connect the transport and, if configured for constant read, spawn
    /// the background thread that keeps receiving until disconnection.
    pub fn connect(&self) -> io::Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.transport.connect()?;

        if self.inner.constant_read {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name("mtline-recv".to_string())
                .spawn(move || inner.read_loop())?;
            *self.read_thread.lock().unwrap() = Some(handle);
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Close the transport, stop the read thread if one is running, and
    /// release every pending request with a disconnection error.
    pub fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.transport.close();

        if let Some(handle) = self.read_thread.lock().unwrap().take() {
            drop(handle.join());
        }

        self.inner.fail_pending();
    }

    /// Send the request, previously sending any accumulated
    /// acknowledgements, and install it in the pending table.
    ///
    /// This method does not wait for the reply; the returned handle
    /// fires once it arrives. Concurrent calls serialize on the internal
    /// lock, so message IDs hit the wire in increasing order.
    pub fn send(&self, request: Request) -> RequestHandle {
        let (tx, rx) = mpsc::channel();
        let mut pending = PendingRequest {
            msg_id: 0,
            constructor_id: request.constructor_id(),
            content_related: request.content_related,
            body: request.body,
            tx,
        };

        let mut state = self.inner.state.lock().unwrap();
        let sent = self
            .inner
            .send_acknowledges(&mut state)
            .and_then(|_| self.inner.transmit(&mut state, &mut pending));

        match sent {
            Ok(()) => {
                state.pending.push(pending);
                if let Err(e) = state.session.save() {
                    warn!("failed to persist the session: {}", e);
                }
            }
            Err(e) => pending.complete(Err(e.into())),
        }

        RequestHandle { rx }
    }

    /// Send a no-op `ping`. Besides keeping the connection alive, this
    /// gives a purely-receiving caller a way to flush accumulated
    /// acknowledgements.
    pub fn ping(&self) -> RequestHandle {
        let ping_id = generate_random_id();
        debug!("sending ping {}", ping_id);
        self.send(Request::new(service::Ping { ping_id }.to_bytes()).content_related(false))
    }

    /// Receive and dispatch a single message from the server.
    ///
    /// Only meaningful when the sender was not configured for constant
    /// read; otherwise the background thread is already doing this.
    pub fn receive(&self) -> Result<(), ReadError> {
        self.inner.receive_once()
    }

    /// Register a callback for messages that do not correlate with any
    /// pending request, predominantly update notifications. Callbacks
    /// may run on any thread.
    pub fn on_unhandled(&self, handler: impl Fn(&R::Value) + Send + 'static) {
        self.inner.handlers.lock().unwrap().push(Box::new(handler));
    }

    /// While logging out the server confirms the final request with a
    /// bare acknowledgement instead of an RPC result.
    pub fn set_logging_out(&self, logging_out: bool) {
        self.inner.logging_out.store(logging_out, Ordering::SeqCst);
    }
}

impl<T: Transport, R: Registry> Inner<T, R> {
    fn read_loop(&self) {
        while !self.shutdown.load(Ordering::SeqCst) && self.transport.is_connected() {
            match self.receive_once() {
                Ok(()) => {}
                Err(ReadError::Transport(net::Error::Timeout)) => {
                    // No problem.
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        warn!("read loop stopping: {}", e);
                    }
                    break;
                }
            }
        }

        self.fail_pending();
    }

    /// Receives a single message from the connected endpoint.
    ///
    /// This method returns nothing on success, and will only affect
    /// other parts of the sender, such as a pending request being
    /// confirmed or the unhandled callbacks being fired.
    fn receive_once(&self) -> Result<(), ReadError> {
        let frame = self.transport.recv()?;
        debug!("received {} encrypted bytes", frame.len());

        // Decryption and parsing run without the lock on purpose, so a
        // slow frame never stalls concurrent `send` calls.
        let (payload, remote_msg_id, remote_seq) = decrypt_message(&self.auth_key, &frame)?;

        let mut unhandled = Vec::new();
        let result = {
            let mut state = self.state.lock().unwrap();
            self.process_message(
                &mut state,
                remote_msg_id,
                remote_seq,
                &payload,
                &mut unhandled,
            )
        };

        // Callbacks run unlocked: one of them may well call `send`.
        if !unhandled.is_empty() {
            let handlers = self.handlers.lock().unwrap();
            if handlers.is_empty() {
                debug!("ignoring {} unhandled message(s)", unhandled.len());
            } else {
                for value in &unhandled {
                    for handler in handlers.iter() {
                        handler(value);
                    }
                }
            }
        }

        result.map(drop)
    }

    /// Processes and handles a single message body.
    ///
    /// Returns `Ok(true)` if the message was handled and `Ok(false)` if
    /// it should be skipped (unknown constructor, or a result for a
    /// request this session no longer knows about).
    fn process_message(
        &self,
        state: &mut State,
        msg_id: i64,
        seq: i32,
        body: &[u8],
        unhandled: &mut Vec<R::Value>,
    ) -> Result<bool, ReadError> {
        let mut reader = Cursor::from_slice(body);
        let code = u32::deserialize(&mut reader)?;
        reader.seek_relative(-4)?;

        // Everything but an acknowledgement must be acknowledged. The
        // `contains` check keeps the ID from being queued twice when a
        // message reaches us wrapped in `gzip_packed`.
        if code != service::MsgsAck::CONSTRUCTOR_ID && !state.pending_ack.contains(&msg_id) {
            state.pending_ack.push(msg_id);
        }

        match code {
            service::RpcResult::CONSTRUCTOR_ID => self.handle_rpc_result(state, &mut reader),
            service::Pong::CONSTRUCTOR_ID => self.handle_pong(state, body),
            service::MsgContainer::CONSTRUCTOR_ID => {
                self.handle_container(state, &mut reader, unhandled)
            }
            service::GzipPacked::CONSTRUCTOR_ID => {
                self.handle_gzip_packed(state, msg_id, seq, &mut reader, unhandled)
            }
            service::BadServerSalt::CONSTRUCTOR_ID => self.handle_bad_server_salt(state, &mut reader),
            service::BadMsgNotification::CONSTRUCTOR_ID => {
                self.handle_bad_msg_notification(state, msg_id, &mut reader)
            }
            service::MsgsAck::CONSTRUCTOR_ID => self.handle_ack(state, &mut reader),
            service::NewSessionCreated::CONSTRUCTOR_ID => {
                self.handle_new_session_created(state, &mut reader, unhandled)
            }
            _ => self.handle_fallthrough(code, &mut reader, unhandled),
        }
    }

    /// `rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;`
    fn handle_rpc_result(&self, state: &mut State, reader: &mut Cursor) -> Result<bool, ReadError> {
        debug!("handling rpc result");
        let rpc_result = service::RpcResult::deserialize(reader)?;
        let inner_constructor = rpc_result.inner_constructor()?;
        let service::RpcResult { req_msg_id, result } = rpc_result;

        let index = state.pending.iter().position(|p| p.msg_id == req_msg_id);

        if inner_constructor == service::RpcError::CONSTRUCTOR_ID {
            let mut error = RpcError::from(service::RpcError::from_bytes(&result)?);
            if state.session.report_errors() {
                if let Some(i) = index {
                    error = error.with_caused_by(state.pending[i].constructor_id);
                }
            }

            // Acknowledge that we received the error right away.
            self.send_acknowledges(state)?;

            debug!("read rpc error: {}", error);
            if let Some(i) = index {
                let pending = state.pending.remove(i);
                pending.complete(Err(if error.is_dc_migration() {
                    InvocationError::InvalidDc(error)
                } else {
                    InvocationError::Rpc(error)
                }));
            }
            return Ok(true);
        }

        let pending = match index {
            Some(i) => state.pending.remove(i),
            None => {
                // A result for a request from a previous connection
                // session; the container handler skips it.
                debug!("lost request {} will be skipped", req_msg_id);
                return Ok(false);
            }
        };

        if inner_constructor == service::GzipPacked::CONSTRUCTOR_ID {
            let packed = service::GzipPacked::from_bytes(&result)?;
            pending.complete(Ok(packed.decompress()?));
        } else {
            pending.complete(Ok(result));
        }
        Ok(true)
    }

    /// `pong#347773c5 msg_id:long ping_id:long = Pong;`
    fn handle_pong(&self, state: &mut State, body: &[u8]) -> Result<bool, ReadError> {
        debug!("handling pong");
        let pong = service::Pong::from_bytes(body)?;

        if let Some(i) = state.pending.iter().position(|p| p.msg_id == pong.msg_id) {
            debug!("pong confirmed a request");
            let pending = state.pending.remove(i);
            pending.complete(Ok(body.to_vec()));
        }
        Ok(true)
    }

    /// `msg_container#73f1f8dc messages:vector<message> = MessageContainer;`
    ///
    /// Inner messages are dispatched in declaration order. A message
    /// that fails to dispatch does not take its siblings down with it;
    /// the first error is reported once the whole container was walked.
    fn handle_container(
        &self,
        state: &mut State,
        reader: &mut Cursor,
        unhandled: &mut Vec<R::Value>,
    ) -> Result<bool, ReadError> {
        debug!("handling container");
        let container = service::MsgContainer::deserialize(reader)?;

        let mut first_error = None;
        for message in container.messages {
            match self.process_message(state, message.msg_id, message.seq_no, &message.body, unhandled)
            {
                Ok(true) => {}
                Ok(false) => debug!("skipped inner message {}", message.msg_id),
                Err(e) => {
                    warn!("inner message {} failed: {}", message.msg_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// `gzip_packed#3072cfa1 packed_data:string = Object;`
    ///
    /// The content is dispatched again under the same outer identifiers.
    fn handle_gzip_packed(
        &self,
        state: &mut State,
        msg_id: i64,
        seq: i32,
        reader: &mut Cursor,
        unhandled: &mut Vec<R::Value>,
    ) -> Result<bool, ReadError> {
        debug!("handling gzip packed data");
        let packed = service::GzipPacked::deserialize(reader)?;
        let unpacked = packed.decompress()?;
        self.process_message(state, msg_id, seq, &unpacked, unhandled)
    }

    /// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int
    /// error_code:int new_server_salt:long = BadMsgNotification;`
    ///
    /// Adopts the announced salt and retransmits the rejected request
    /// with a fresh message ID. The retransmission reuses the same
    /// internal routine as `send`, so the public entry point is never
    /// re-entered from the receive path.
    fn handle_bad_server_salt(
        &self,
        state: &mut State,
        reader: &mut Cursor,
    ) -> Result<bool, ReadError> {
        debug!("handling bad server salt");
        let notification = service::BadServerSalt::deserialize(reader)?;
        state.session.set_salt(notification.new_server_salt);

        if let Some(i) = state
            .pending
            .iter()
            .position(|p| p.msg_id == notification.bad_msg_id)
        {
            let mut pending = state.pending.remove(i);
            info!(
                "resending request {} with the new server salt",
                notification.bad_msg_id
            );
            self.send_acknowledges(state)?;
            self.transmit(state, &mut pending)?;
            state.pending.push(pending);
        }

        if let Err(e) = state.session.save() {
            warn!("failed to persist the session: {}", e);
        }
        Ok(true)
    }

    /// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int
    /// error_code:int = BadMsgNotification;`
    ///
    /// Codes 16 and 17 mean our clock is off; the carrying message's own
    /// ID is a trusted sample of server time, so it is used to correct
    /// the offset. Anything else is fatal for this receive call.
    fn handle_bad_msg_notification(
        &self,
        state: &mut State,
        msg_id: i64,
        reader: &mut Cursor,
    ) -> Result<bool, ReadError> {
        debug!("handling bad message notification");
        let notification = service::BadMsgNotification::deserialize(reader)?;

        match notification.error_code {
            16 | 17 => {
                state.session.update_time_offset(msg_id);
                if let Err(e) = state.session.save() {
                    warn!("failed to persist the session: {}", e);
                }
                info!(
                    "bad message {} ({}); corrected the time offset",
                    notification.error_code,
                    ReadError::bad_message_description(notification.error_code)
                );
                Ok(true)
            }
            code => Err(ReadError::BadMessage { code }),
        }
    }

    /// `msgs_ack#62d6b459 msg_ids:Vector long = MsgsAck;`
    ///
    /// Acknowledgements carry no body. They only complete a request when
    /// logging out, where the server confirms the final request this way.
    fn handle_ack(&self, state: &mut State, reader: &mut Cursor) -> Result<bool, ReadError> {
        let ack = service::MsgsAck::deserialize(reader)?;

        if self.logging_out.load(Ordering::SeqCst) {
            let mut i = 0;
            while i < state.pending.len() {
                if ack.msg_ids.contains(&state.pending[i].msg_id) {
                    debug!("message ack confirmed a request");
                    let pending = state.pending.remove(i);
                    pending.complete(Ok(Vec::new()));
                } else {
                    i += 1;
                }
            }
        }
        Ok(true)
    }

    /// `new_session_created#9ec20908 first_msg_id:long unique_id:long
    /// server_salt:long = NewSession;`
    fn handle_new_session_created(
        &self,
        state: &mut State,
        reader: &mut Cursor,
        unhandled: &mut Vec<R::Value>,
    ) -> Result<bool, ReadError> {
        debug!("handling new session notification");
        let new_session = service::NewSessionCreated::deserialize(reader)?;
        state.session.set_salt(new_session.server_salt);

        // The notification itself is also of interest to upper layers,
        // e.g. to detect gaps in the update stream.
        if self.registry.is_known(service::NewSessionCreated::CONSTRUCTOR_ID) {
            reader.seek(0)?;
            unhandled.push(self.registry.read(reader)?);
        }
        Ok(true)
    }

    /// Anything that is not parsed manually should be a schema object.
    fn handle_fallthrough(
        &self,
        code: u32,
        reader: &mut Cursor,
        unhandled: &mut Vec<R::Value>,
    ) -> Result<bool, ReadError> {
        if self.registry.is_known(code) {
            debug!("passing object {:08x} to the unhandled callbacks", code);
            unhandled.push(self.registry.read(reader)?);
            Ok(true)
        } else {
            debug!("unknown message: {:08x}", code);
            Ok(false)
        }
    }

    /// Sends a `msgs_ack` with every message ID pending confirmation.
    ///
    /// Acknowledgements are not content-related and never enter the
    /// pending table.
    fn send_acknowledges(&self, state: &mut State) -> Result<(), net::Error> {
        if state.pending_ack.is_empty() {
            return Ok(());
        }

        let ack = service::MsgsAck {
            msg_ids: mem::take(&mut state.pending_ack),
        };
        debug!("acknowledging {} message(s)", ack.msg_ids.len());

        let body = ack.to_bytes();
        let msg_id = state.session.get_new_msg_id();
        let seq_no = state.session.generate_sequence(false);
        let frame = encrypt_message(
            &self.auth_key,
            state.session.salt(),
            state.session.id(),
            msg_id,
            seq_no,
            &body,
        );

        match self.transport.send(&frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Put them back so they go out with the next attempt.
                state.pending_ack = ack.msg_ids;
                Err(e)
            }
        }
    }

    /// Assign a fresh message ID and sequence number to the request,
    /// encrypt it and put it on the wire.
    fn transmit(&self, state: &mut State, pending: &mut PendingRequest) -> Result<(), net::Error> {
        let msg_id = state.session.get_new_msg_id();
        let seq_no = state.session.generate_sequence(pending.content_related);
        let frame = encrypt_message(
            &self.auth_key,
            state.session.salt(),
            state.session.id(),
            msg_id,
            seq_no,
            &pending.body,
        );

        self.transport.send(&frame)?;
        pending.msg_id = msg_id;
        debug!(
            "sent request {:08x} as message {}",
            pending.constructor_id, msg_id
        );
        Ok(())
    }

    fn fail_pending(&self) {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            return;
        }

        warn!(
            "marking all {} pending request(s) as failed",
            state.pending.len()
        );
        for pending in state.pending.drain(..) {
            pending.complete(Err(InvocationError::Dropped));
        }
    }
}
