//! Per-target session: setup state machine, request multiplexing, timeouts.
//!
//! Each session owns exactly one UDP endpoint and one in-flight registry,
//! both private to a dedicated task. Callers reach the task over a message
//! channel; responses, timeouts, and errors come back through per-request
//! oneshot sinks. Setup (capability discovery through privilege escalation)
//! runs strictly sequentially before the task starts serving; once active,
//! any number of requests may be in flight, distinguished by the 6-bit
//! requestor sequence number.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};

use crate::auth;
use crate::codec::{self, RmcpMessage, SessionPacket};
use crate::commands::{
    ActivateSession, CloseSession, Command, GetAuthCapabilities, GetDeviceId, GetSessionChallenge,
    SetSessionPrivilege,
};
use crate::config::ResolvedOptions;
use crate::debug;
use crate::error::{Error, Result, SetupStep};
use crate::events::{CloseReason, EventBus, EventKind};
use crate::fru::{FruDecodeOptions, FruInventory};
use crate::registry::{Registry, ReplayWindow, ResponseSink};
use crate::sel::SelEntry;
use crate::transport::Transport;
use crate::types::{AuthType, DeviceId, RawResponse, SessionHandle};

/// Shared table of live sessions, used by `stats()` enumeration. Entries are
/// weak so the table never keeps an abandoned session alive; tasks remove
/// their own entry on exit anyway.
pub(crate) type SessionTable = Arc<Mutex<HashMap<SessionHandle, mpsc::WeakSender<Op>>>>;

pub(crate) enum Op {
    Request {
        netfn: u8,
        cmd: u8,
        data: Vec<u8>,
        reply: ResponseSink,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// A live IPMI session.
///
/// Cheap to clone; all clones address the same session task. The session
/// closes when [`close`](Session::close) is called or every clone is dropped,
/// releasing the socket either way.
#[derive(Debug, Clone)]
pub struct Session {
    handle: SessionHandle,
    tx: mpsc::Sender<Op>,
    bus: EventBus,
}

impl Session {
    pub(crate) async fn open(
        target: SocketAddr,
        options: ResolvedOptions,
        bus: EventBus,
        table: SessionTable,
        tag: u32,
    ) -> Result<Session> {
        let transport = Transport::bind(target).await?;
        let handle = SessionHandle::new(target, tag);

        let mut setup = Setup {
            transport,
            options,
            rq_seq: 0,
        };
        let activated = setup.establish().await?;

        let (tx, rx) = mpsc::channel(64);
        if let Ok(mut sessions) = table.lock() {
            sessions.insert(handle, tx.downgrade());
        }
        bus.publish(handle, EventKind::Established);

        let task = SessionTask {
            handle,
            transport: setup.transport,
            options: setup.options,
            bus: bus.clone(),
            table,
            rx,
            registry: Registry::new(),
            replay: activated.replay,
            auth: activated.auth,
            session_id: activated.session_id,
            out_seq: activated.out_seq,
            close_reply: None,
        };
        tokio::spawn(task.run());

        Ok(Session { handle, tx, bus })
    }

    /// The handle identifying this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Publish a notification about this session to the event bus.
    pub(crate) fn publish(&self, kind: EventKind) {
        self.bus.publish(self.handle, kind);
    }

    /// Send a raw request and await the response data.
    ///
    /// Exactly one outcome is produced per call: the response data on
    /// completion code 0x00, [`Error::Bmc`] for any other completion code,
    /// [`Error::Timeout`] when the deadline passes, or [`Error::NoSession`]
    /// once the session is gone.
    pub async fn raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<Vec<u8>> {
        let start = std::time::Instant::now();
        let result = self.raw_inner(netfn, cmd, data).await;
        match &result {
            Ok(_) => crate::observe::record_ok(netfn, cmd, start.elapsed()),
            Err(err) => crate::observe::record_err(netfn, cmd, start.elapsed(), err),
        }
        result
    }

    async fn raw_inner(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Op::Request {
                netfn,
                cmd,
                data: data.to_vec(),
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Execute a typed command.
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let data = self.raw(C::NETFN, C::CMD, &command.request_data()).await?;
        command.parse_response(RawResponse {
            completion_code: 0x00,
            data,
        })
    }

    /// Convenience wrapper for `Get Device ID`.
    pub async fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId).await
    }

    /// Read and decode the FRU inventory of `fru_id`.
    ///
    /// Returns `None` for devices the BMC reports as absent.
    pub async fn read_fru(&self, fru_id: u8) -> Result<Option<FruInventory>> {
        crate::fru::read(self, fru_id, &FruDecodeOptions::default()).await
    }

    /// Like [`read_fru`](Session::read_fru) with explicit decode options
    /// (e.g. OEM multi-record decoders).
    pub async fn read_fru_with(
        &self,
        fru_id: u8,
        options: &FruDecodeOptions,
    ) -> Result<Option<FruInventory>> {
        crate::fru::read(self, fru_id, options).await
    }

    /// Read the System Event Log, optionally clearing it afterwards.
    pub async fn read_sel(&self, clear: bool) -> Result<Vec<SelEntry>> {
        crate::sel::read(self, clear).await
    }

    /// Close the session: best-effort Close Session on the wire, then local
    /// teardown. Outstanding requests fail with [`Error::NoSession`].
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Op::Close { reply })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)
    }
}

/// Outcome of the setup phase.
struct Activated {
    auth: AuthType,
    session_id: u32,
    out_seq: u32,
    replay: ReplayWindow,
}

/// Setup-phase I/O: one request in flight at a time, direct awaits on the
/// socket with the per-request deadline.
struct Setup {
    transport: Transport,
    options: ResolvedOptions,
    rq_seq: u8,
}

impl Setup {
    async fn establish(&mut self) -> Result<Activated> {
        // Capability discovery and challenge run outside any session: auth
        // type none, session id 0, session sequence 0.
        let caps = self
            .transact(AuthType::None, 0, 0, GetAuthCapabilities::new(self.options.privilege))
            .await?;

        let auth = caps.strongest().ok_or(Error::Auth {
            step: SetupStep::AuthCap,
        })?;

        let challenge = self
            .transact(
                AuthType::None,
                0,
                0,
                GetSessionChallenge {
                    auth,
                    user: self.options.user,
                },
            )
            .await
            .map_err(|err| auth_step(err, SetupStep::Challenge))?;

        // Activation switches to the chosen auth type under the temporary
        // session id from the challenge.
        let activated = self
            .transact(
                auth,
                challenge.temporary_session_id,
                0,
                ActivateSession {
                    auth,
                    privilege: self.options.privilege,
                    challenge: challenge.challenge,
                    initial_outbound_seq: self.options.initial_outbound_seq,
                },
            )
            .await
            .map_err(|err| auth_step(err, SetupStep::Activate))?;

        let auth = activated.auth;
        let session_id = activated.session_id;
        let mut out_seq = activated.initial_inbound_seq;
        let mut replay = ReplayWindow::new();

        let seq = out_seq;
        out_seq = out_seq.wrapping_add(1);
        let (_, packet_seq) = self
            .transact_in_session(
                auth,
                session_id,
                seq,
                SetSessionPrivilege {
                    privilege: self.options.privilege,
                },
            )
            .await
            .map_err(|err| auth_step(err, SetupStep::SetPrivilege))?;
        replay.observe(packet_seq);

        Ok(Activated {
            auth,
            session_id,
            out_seq,
            replay,
        })
    }

    async fn transact<C: Command>(
        &mut self,
        auth: AuthType,
        session_id: u32,
        session_seq: u32,
        command: C,
    ) -> Result<C::Output> {
        let (output, _) = self
            .transact_in_session(auth, session_id, session_seq, command)
            .await?;
        Ok(output)
    }

    /// Send one setup request and wait for its response, returning the typed
    /// output together with the response's session sequence number.
    async fn transact_in_session<C: Command>(
        &mut self,
        auth: AuthType,
        session_id: u32,
        session_seq: u32,
        command: C,
    ) -> Result<(C::Output, u32)> {
        let rq_seq = self.rq_seq;
        self.rq_seq = (self.rq_seq + 1) & 0x3F;

        let lan = codec::encode_lan_request(
            C::NETFN,
            C::CMD,
            self.options.rq_addr,
            rq_seq,
            &command.request_data(),
        );
        let code = auth::auth_code(auth, &self.options.password, session_id, session_seq, &lan);
        let packet = codec::encode_session_packet(auth.as_u8(), session_seq, session_id, code, &lan);
        debug::dump_hex("setup request", &packet);
        self.transport.send(&packet).await?;

        let deadline = Instant::now() + self.options.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let (datagram, from) = match timeout(remaining, self.transport.recv()).await {
                Err(_) => return Err(Error::Timeout),
                Ok(received) => received?,
            };
            if from != self.transport.target() {
                continue;
            }
            debug::dump_hex("setup response", &datagram);

            // Decode errors abort the open: setup is the one phase where a
            // malformed frame is fatal.
            let message = codec::decode_rmcp(&datagram).map_err(Error::Decode)?;
            if let Some(ack) = message.required_ack() {
                let _ = self.transport.send(&ack).await;
            }
            let RmcpMessage::Ipmi { packet, .. } = message else {
                continue;
            };

            if let Some(received_code) = packet.auth_code {
                let verified = auth::verify_auth_code(
                    auth,
                    &self.options.password,
                    packet.session_id,
                    packet.session_seq,
                    &packet.payload,
                    &received_code,
                );
                if !verified {
                    return Err(Error::Decode(crate::error::DecodeError::BadChecksum));
                }
            }

            let response = codec::decode_lan_response(&packet.payload).map_err(Error::Decode)?;
            if response.rq_seq != rq_seq || response.cmd != C::CMD {
                continue;
            }

            let output = command.parse_response(RawResponse {
                completion_code: response.completion_code,
                data: response.data,
            })?;
            return Ok((output, packet.session_seq));
        }
    }
}

fn auth_step(err: Error, step: SetupStep) -> Error {
    match err {
        Error::Bmc(_) => Error::Auth { step },
        other => other,
    }
}

struct SessionTask {
    handle: SessionHandle,
    transport: Transport,
    options: ResolvedOptions,
    bus: EventBus,
    table: SessionTable,
    rx: mpsc::Receiver<Op>,
    registry: Registry,
    replay: ReplayWindow,
    auth: AuthType,
    session_id: u32,
    out_seq: u32,
    close_reply: Option<oneshot::Sender<()>>,
}

impl SessionTask {
    async fn run(mut self) {
        let reason = self.serve().await;
        self.shutdown(reason).await;
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            self.registry.purge_cancelled();
            let deadline = self.registry.next_deadline();

            tokio::select! {
                op = self.rx.recv() => match op {
                    Some(Op::Request { netfn, cmd, data, reply }) => {
                        if self.submit(netfn, cmd, data, reply).await.is_err() {
                            return CloseReason::Transport;
                        }
                    }
                    Some(Op::Close { reply }) => {
                        self.close_reply = Some(reply);
                        return CloseReason::User;
                    }
                    None => return CloseReason::User,
                },
                received = self.transport.recv() => match received {
                    Ok((datagram, from)) => {
                        if let Some(reason) = self.handle_datagram(datagram, from).await {
                            return reason;
                        }
                    }
                    Err(_) => return CloseReason::Transport,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_timeouts();
                }
            }
        }
    }

    async fn submit(
        &mut self,
        netfn: u8,
        cmd: u8,
        data: Vec<u8>,
        reply: ResponseSink,
    ) -> Result<()> {
        let Some(rq_seq) = self.registry.allocate() else {
            let _ = reply.send(Err(Error::Protocol("all 64 sequence numbers in flight")));
            return Ok(());
        };

        let lan = codec::encode_lan_request(netfn, cmd, self.options.rq_addr, rq_seq, &data);
        let session_seq = self.out_seq;
        self.out_seq = self.out_seq.wrapping_add(1);
        let code = auth::auth_code(
            self.auth,
            &self.options.password,
            self.session_id,
            session_seq,
            &lan,
        );
        let packet = codec::encode_session_packet(
            self.auth.as_u8(),
            session_seq,
            self.session_id,
            code,
            &lan,
        );
        debug::dump_hex("request", &packet);

        match self.transport.send(&packet).await {
            Ok(()) => {
                let deadline = Instant::now() + self.options.timeout;
                self.registry.insert(rq_seq, reply, deadline);
                Ok(())
            }
            Err(err) => {
                let _ = reply.send(Err(Error::Transport("send failed")));
                Err(err)
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: Vec<u8>, from: SocketAddr) -> Option<CloseReason> {
        if from != self.transport.target() {
            // Spoofed or stray traffic; not even worth an event.
            return None;
        }
        debug::dump_hex("received", &datagram);

        let message = match codec::decode_rmcp(&datagram) {
            Ok(message) => message,
            Err(reason) => {
                self.bus
                    .publish(self.handle, EventKind::DecodeError { reason });
                return None;
            }
        };
        if let Some(ack) = message.required_ack() {
            let _ = self.transport.send(&ack).await;
        }
        let RmcpMessage::Ipmi { packet, .. } = message else {
            return None;
        };

        if packet.session_id == self.session_id {
            self.handle_in_session(packet);
            None
        } else if packet.session_id == 0 {
            // Pre-session-format reply in the active phase: the BMC no longer
            // recognises our session id.
            self.handle_session_invalidated(packet)
        } else {
            None
        }
    }

    fn handle_in_session(&mut self, packet: SessionPacket) {
        if let Some(received_code) = packet.auth_code {
            let verified = auth::verify_auth_code(
                self.auth,
                &self.options.password,
                packet.session_id,
                packet.session_seq,
                &packet.payload,
                &received_code,
            );
            if !verified {
                self.bus.publish(
                    self.handle,
                    EventKind::DecodeError {
                        reason: crate::error::DecodeError::BadChecksum,
                    },
                );
                return;
            }
        }

        if !self.replay.observe(packet.session_seq) {
            return;
        }

        let response = match codec::decode_lan_response(&packet.payload) {
            Ok(response) => response,
            Err(reason) => {
                self.bus
                    .publish(self.handle, EventKind::DecodeError { reason });
                return;
            }
        };
        if response.rq_addr != self.options.rq_addr {
            return;
        }

        match self.registry.complete(response.rq_seq) {
            Some(sink) => {
                let result = if response.completion_code == 0x00 {
                    Ok(response.data)
                } else {
                    Err(Error::Bmc(crate::error::CompletionCode::from_u8(
                        response.completion_code,
                    )))
                };
                // A closed sink means the caller cancelled; the response is
                // discarded.
                let _ = sink.send(result);
            }
            None => {
                self.bus.publish(
                    self.handle,
                    EventKind::NoRequestor {
                        seq: response.rq_seq,
                        netfn: response.netfn,
                        cmd: response.cmd,
                        completion_code: response.completion_code,
                    },
                );
            }
        }
    }

    fn handle_session_invalidated(&mut self, packet: SessionPacket) -> Option<CloseReason> {
        let response = codec::decode_lan_response(&packet.payload).ok()?;
        if response.completion_code == 0x00 {
            return None;
        }
        if let Some(sink) = self.registry.complete(response.rq_seq) {
            let _ = sink.send(Err(Error::Bmc(crate::error::CompletionCode::from_u8(
                response.completion_code,
            ))));
            return Some(CloseReason::Remote);
        }
        None
    }

    fn fire_timeouts(&mut self) {
        let now = Instant::now();
        for (seq, sink) in self.registry.expire(now) {
            self.bus
                .publish(self.handle, EventKind::RequestTimeout { seq });
            let _ = sink.send(Err(Error::Timeout));
        }
    }

    async fn shutdown(mut self, reason: CloseReason) {
        if let Ok(mut sessions) = self.table.lock() {
            sessions.remove(&self.handle);
        }

        // Best-effort Close Session; the BMC ages the session out anyway if
        // the frame is lost.
        if reason == CloseReason::User {
            let rq_seq = self.registry.allocate().unwrap_or(0);
            let close = CloseSession {
                session_id: self.session_id,
            };
            let lan = codec::encode_lan_request(
                CloseSession::NETFN,
                CloseSession::CMD,
                self.options.rq_addr,
                rq_seq,
                &close.request_data(),
            );
            let session_seq = self.out_seq;
            self.out_seq = self.out_seq.wrapping_add(1);
            let code = auth::auth_code(
                self.auth,
                &self.options.password,
                self.session_id,
                session_seq,
                &lan,
            );
            let packet = codec::encode_session_packet(
                self.auth.as_u8(),
                session_seq,
                self.session_id,
                code,
                &lan,
            );
            let _ = timeout(Duration::from_millis(250), self.transport.send(&packet)).await;
        }

        for sink in self.registry.drain() {
            let _ = sink.send(Err(Error::NoSession));
        }

        self.bus.publish(self.handle, EventKind::Closed { reason });
        if let Some(reply) = self.close_reply.take() {
            let _ = reply.send(());
        }
    }
}
