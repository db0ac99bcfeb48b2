//! Per-client connection state machine.
//!
//! A [`Connection`] owns a receive buffer, a one-frame send buffer and the
//! transport. The reactor calls [`Connection::tick`] whenever the connection
//! may be able to make progress; a tick never blocks and performs at most one
//! read, a bounded number of writes, or one VM slice.
//!
//! ```text
//!            frame parsed, response queued
//!   ┌─────┐ ─────────────────────────────▶ ┌─────┐
//!   │ Req │                                │ Res │
//!   └─────┘ ◀───────────── flushed ─────── └─────┘
//!     ▲  │                                    │ flushed EXEC
//!     │  │ EOF / protocol error               ▼
//!     │  ▼              EOF                ┌──────┐
//!     │ ┌─────┐ ◀───────────────────────── │ Loop │ ◀─┐ budget exhausted
//!     │ │ End │                            └──────┘ ──┘
//!     │ └─────┘                               │
//!     └──────── finished or errored ──────────┘
//! ```

use crate::network::handlers::{self, Next};
use crate::network::protocol::{ProtocolError, Request, MAX_FRAME_SIZE};
use crate::network::transport::Transport;
use crate::types::encoding::{Encode, EncodeSink};
use crate::virtual_machine::vm::budget::StepResult;
use crate::virtual_machine::vm::Vm;
use crate::{debug, info, warn};
use std::io;

/// Size of each connection's receive buffer.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Where a connection is in its request/response cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnState {
    /// Reading and dispatching requests.
    Req,
    /// A response is partially written.
    Res,
    /// Driving the shared VM one slice per tick.
    Loop,
    /// Finished; the reactor drops the connection.
    End,
}

/// What a connection is waiting for before its next tick can make progress.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wants {
    Readable,
    Writable,
    /// Can progress without any I/O readiness.
    Now,
    Closed,
}

/// Fixed buffer holding the one response being sent.
struct FrameBuffer {
    bytes: [u8; MAX_FRAME_SIZE],
    len: usize,
    sent: usize,
}

impl FrameBuffer {
    const fn new() -> Self {
        Self {
            bytes: [0; MAX_FRAME_SIZE],
            len: 0,
            sent: 0,
        }
    }

    /// Replaces the contents with an encoded frame.
    fn load<E: Encode>(&mut self, frame: &E) {
        self.len = 0;
        self.sent = 0;
        frame.encode(self);
    }

    fn unsent(&self) -> &[u8] {
        &self.bytes[self.sent..self.len]
    }

    fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.len);
    }

    fn is_drained(&self) -> bool {
        self.sent >= self.len
    }

    fn clear(&mut self) {
        self.len = 0;
        self.sent = 0;
    }
}

impl EncodeSink for FrameBuffer {
    fn write(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(MAX_FRAME_SIZE - self.len);
        self.bytes[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }
}

/// One client connection.
pub struct Connection<T> {
    transport: T,
    state: ConnState,
    read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    read_len: usize,
    write_buf: FrameBuffer,
    /// The response being flushed belongs to an EXEC.
    resume_loop: bool,
    /// The peer closed its sending half; remaining frames are still served.
    peer_closed: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ConnState::Req,
            read_buf: Box::new([0; READ_BUFFER_SIZE]),
            read_len: 0,
            write_buf: FrameBuffer::new(),
            resume_loop: false,
            peer_closed: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::End
    }

    /// Bytes received but not consumed by a request yet.
    pub fn buffered(&self) -> &[u8] {
        &self.read_buf[..self.read_len]
    }

    pub fn wants(&self) -> Wants {
        match self.state {
            ConnState::Req if self.peer_closed || self.has_frame() => Wants::Now,
            ConnState::Req => Wants::Readable,
            ConnState::Res => Wants::Writable,
            ConnState::Loop => Wants::Now,
            ConnState::End => Wants::Closed,
        }
    }

    /// Whether the buffer starts with something the parser can act on: a
    /// complete frame or an invalid header.
    fn has_frame(&self) -> bool {
        !matches!(Request::parse(self.buffered()), Ok(None))
    }

    /// Advances the state machine by one step without blocking.
    pub fn tick(&mut self, vm: &mut Vm, slice_budget: u32) {
        match self.state {
            ConnState::Req => self.on_request(vm),
            ConnState::Res => self.flush(),
            ConnState::Loop => self.on_loop(vm, slice_budget),
            ConnState::End => {}
        }
    }

    /// One non-blocking read into the tail of the receive buffer. Records end
    /// of stream in `peer_closed`; a read error ends the connection.
    fn read_input(&mut self) {
        if self.peer_closed || self.read_len == READ_BUFFER_SIZE {
            return;
        }
        match self.transport.try_read(&mut self.read_buf[self.read_len..]) {
            Ok(0) => self.peer_closed = true,
            Ok(n) => self.read_len += n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!("{}: read failed: {err}", self.transport.peer());
                self.state = ConnState::End;
            }
        }
    }

    fn on_request(&mut self, vm: &mut Vm) {
        self.read_input();
        if self.state == ConnState::End {
            return;
        }

        self.process_frames(vm);

        if self.peer_closed && self.state == ConnState::Req {
            if self.read_len > 0 {
                let err = ProtocolError::UnexpectedEof {
                    buffered: self.read_len,
                };
                warn!("{}: {err}", self.transport.peer());
            } else {
                debug!("{}: closed by peer", self.transport.peer());
            }
            self.state = ConnState::End;
        }
    }

    /// Serves buffered frames in arrival order until the buffer runs dry, a
    /// response cannot be flushed completely, or an EXEC starts.
    fn process_frames(&mut self, vm: &mut Vm) {
        while self.state == ConnState::Req {
            let (request, consumed) = match Request::parse(self.buffered()) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!("{}: {err}", self.transport.peer());
                    self.state = ConnState::End;
                    return;
                }
            };
            self.read_buf.copy_within(consumed..self.read_len, 0);
            self.read_len -= consumed;

            let (response, next) = handlers::dispatch(vm, &request);
            self.write_buf.load(&response);
            self.resume_loop = next == Next::Execute;
            self.state = ConnState::Res;
            self.flush();
        }
    }

    /// Writes the pending response. Leaves the state at `Res` when the
    /// transport would block.
    fn flush(&mut self) {
        while !self.write_buf.is_drained() {
            match self.transport.try_write(self.write_buf.unsent()) {
                Ok(0) => {
                    warn!("{}: connection stopped accepting data", self.transport.peer());
                    self.state = ConnState::End;
                    return;
                }
                Ok(n) => self.write_buf.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("{}: write failed: {err}", self.transport.peer());
                    self.state = ConnState::End;
                    return;
                }
            }
        }

        self.write_buf.clear();
        self.state = if std::mem::take(&mut self.resume_loop) {
            ConnState::Loop
        } else {
            ConnState::Req
        };
    }

    /// Runs one VM slice. A peer that went away takes its running program
    /// with it.
    fn on_loop(&mut self, vm: &mut Vm, slice_budget: u32) {
        self.read_input();
        if self.state == ConnState::End {
            return;
        }
        if self.peer_closed {
            debug!(
                "{}: closed by peer, abandoning program at pc {}",
                self.transport.peer(),
                vm.memory().pc()
            );
            self.state = ConnState::End;
            return;
        }

        match vm.run_slice(slice_budget) {
            StepResult::BudgetExhausted => {}
            StepResult::Finished => {
                let stats = vm.stats();
                info!(
                    "{}: program finished, R0 = {} ({} instructions over {} slices)",
                    self.transport.peer(),
                    vm.result(),
                    stats.instructions,
                    stats.slices
                );
                self.state = ConnState::Req;
            }
            StepResult::Errored(err) => {
                warn!(
                    "{}: execution aborted at pc {}: {err}",
                    self.transport.peer(),
                    vm.memory().pc()
                );
                self.state = ConnState::Req;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::local_transport::LocalTransport;
    use crate::network::protocol::{
        Method, Payload, Range, RequestHeader, Response, ResponseHeader, Status, HEADER_SIZE,
    };
    use crate::types::encoding::Decode;
    use crate::utils::test_utils::utils::{factorial, numbered, spin_forever};
    use crate::virtual_machine::isa::{Instruction, Opcode};

    const BUDGET: u32 = 4;

    fn setup() -> (Connection<LocalTransport>, LocalTransport) {
        let transport = LocalTransport::new("test-peer");
        (Connection::new(transport.clone()), transport)
    }

    fn frame(method: Method, payload: &[u8]) -> Vec<u8> {
        Request::new(method, Payload::from_slice(payload).unwrap()).to_bytes()
    }

    fn merge_frame(insts: &[Instruction]) -> Vec<u8> {
        let bytes: Vec<u8> = insts.iter().flat_map(|inst| inst.to_bytes()).collect();
        frame(Method::Merge, &bytes)
    }

    fn responses(mut bytes: &[u8]) -> Vec<Response> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let header = ResponseHeader::decode(&mut bytes).unwrap();
            let (payload, rest) = bytes.split_at(header.size as usize);
            out.push(Response::new(header.status, Payload::from_slice(payload).unwrap()));
            bytes = rest;
        }
        out
    }

    fn tick_until_req(conn: &mut Connection<LocalTransport>, vm: &mut Vm) -> usize {
        let mut ticks = 0;
        while conn.state() == ConnState::Loop {
            conn.tick(vm, BUDGET);
            ticks += 1;
            assert!(ticks < 10_000, "program did not finish");
        }
        ticks
    }

    #[test]
    fn pipelined_frames_are_answered_in_order() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();

        let mut bytes = merge_frame(&numbered(2));
        bytes.extend(frame(Method::Get, &Range { offset: 1, count: 2 }.to_bytes()));
        bytes.extend(
            RequestHeader {
                method: 77,
                size: 0,
            }
            .to_bytes(),
        );
        peer.feed(&bytes);

        conn.tick(&mut vm, BUDGET);

        let got = responses(&peer.take_output());
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], Response::status(Status::Success));
        assert_eq!(got[1].payload.decode_all::<Instruction>().unwrap(), numbered(2)[1..].to_vec());
        assert_eq!(got[2].status, Status::UnknownMethod);
        assert_eq!(conn.state(), ConnState::Req);
        assert_eq!(conn.wants(), Wants::Readable);
    }

    #[test]
    fn frame_split_across_reads() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        let bytes = merge_frame(&numbered(1));

        peer.feed(&bytes[..5]);
        conn.tick(&mut vm, BUDGET);
        assert!(peer.take_output().is_empty());
        assert_eq!(conn.buffered().len(), 5);
        assert_eq!(conn.wants(), Wants::Readable);

        peer.feed(&bytes[5..]);
        conn.tick(&mut vm, BUDGET);
        assert_eq!(responses(&peer.take_output()).len(), 1);
        assert!(conn.buffered().is_empty());
        assert_eq!(vm.program().len(), 1);
    }

    #[test]
    fn partial_write_resumes_on_next_tick() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.set_write_capacity(Some(3));
        peer.feed(&frame(Method::Reset, &[]));

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Res);
        assert_eq!(conn.wants(), Wants::Writable);
        assert_eq!(peer.take_output().len(), 3);

        peer.set_write_capacity(None);
        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Req);
        assert_eq!(peer.take_output().len(), HEADER_SIZE - 3);
    }

    #[test]
    fn blocked_write_holds_back_later_frames() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.set_write_capacity(Some(0));

        let mut bytes = merge_frame(&numbered(1));
        bytes.extend(merge_frame(&numbered(2)));
        peer.feed(&bytes);

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Res);
        assert_eq!(vm.program().len(), 1);

        peer.set_write_capacity(None);
        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Req);
        assert_eq!(conn.wants(), Wants::Now);

        conn.tick(&mut vm, BUDGET);
        assert_eq!(vm.program().len(), 3);
        assert_eq!(responses(&peer.take_output()).len(), 2);
    }

    #[test]
    fn exec_runs_in_slices_then_returns_to_requests() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&factorial(5)[..2]));
        peer.feed(&merge_frame(&factorial(5)[2..4]));
        peer.feed(&merge_frame(&factorial(5)[4..6]));
        peer.feed(&merge_frame(&factorial(5)[6..]));
        peer.feed(&frame(Method::Exec, &[]));
        peer.feed(&frame(Method::Dump, &Range { offset: 0, count: 1 }.to_bytes()));

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Loop);
        assert_eq!(conn.wants(), Wants::Now);
        assert_eq!(responses(&peer.take_output()).len(), 5);

        let ticks = tick_until_req(&mut conn, &mut vm);
        assert!(ticks > 1);
        assert_eq!(vm.result(), 120);
        assert_eq!(conn.wants(), Wants::Now);

        conn.tick(&mut vm, BUDGET);
        let got = responses(&peer.take_output());
        assert_eq!(got[0].payload.decode_all::<i32>().unwrap(), vec![120]);
    }

    #[test]
    fn execution_error_returns_to_requests() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&[Instruction::new(Opcode::Divi, 0, 0, 0)]));
        peer.feed(&frame(Method::Exec, &[]));

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Loop);
        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Req);

        let got = responses(&peer.take_output());
        assert!(got.iter().all(Response::is_success));
    }

    #[test]
    fn endless_program_keeps_looping() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&spin_forever()));
        peer.feed(&frame(Method::Exec, &[]));

        conn.tick(&mut vm, BUDGET);
        for _ in 0..50 {
            conn.tick(&mut vm, BUDGET);
            assert_eq!(conn.state(), ConnState::Loop);
        }
        assert_eq!(vm.stats().instructions, 50 * BUDGET as u64);
    }

    #[test]
    fn peer_close_abandons_running_program() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&spin_forever()));
        peer.feed(&frame(Method::Exec, &[]));

        conn.tick(&mut vm, BUDGET);
        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Loop);
        let executed = vm.stats().instructions;

        peer.close();
        conn.tick(&mut vm, BUDGET);
        assert!(conn.is_closed());
        assert_eq!(conn.wants(), Wants::Closed);
        assert_eq!(vm.stats().instructions, executed);
    }

    #[test]
    fn frames_sent_during_execution_wait_for_it() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&factorial(5)[..2]));
        peer.feed(&merge_frame(&factorial(5)[2..4]));
        peer.feed(&merge_frame(&factorial(5)[4..6]));
        peer.feed(&merge_frame(&factorial(5)[6..]));
        peer.feed(&frame(Method::Exec, &[]));

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Loop);
        assert_eq!(responses(&peer.take_output()).len(), 5);

        peer.feed(&frame(Method::Dump, &Range { offset: 0, count: 1 }.to_bytes()));
        conn.tick(&mut vm, BUDGET);
        assert_eq!(peer.pending_input(), 0);
        assert!(peer.take_output().is_empty());

        tick_until_req(&mut conn, &mut vm);
        conn.tick(&mut vm, BUDGET);
        let got = responses(&peer.take_output());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload.decode_all::<i32>().unwrap(), vec![120]);
    }

    #[test]
    fn eof_closes_gracefully() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.close();

        conn.tick(&mut vm, BUDGET);
        assert!(conn.is_closed());
        assert_eq!(conn.wants(), Wants::Closed);
    }

    #[test]
    fn eof_mid_frame_ends_connection() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&[0, 0, 0]);
        peer.close();

        conn.tick(&mut vm, BUDGET);
        assert_eq!(conn.state(), ConnState::Req);
        conn.tick(&mut vm, BUDGET);
        assert!(conn.is_closed());
        assert!(peer.take_output().is_empty());
    }

    #[test]
    fn eof_after_complete_frames_serves_them_first() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        peer.feed(&merge_frame(&numbered(2)));
        peer.close();

        conn.tick(&mut vm, BUDGET);
        assert_eq!(responses(&peer.take_output()).len(), 1);
        conn.tick(&mut vm, BUDGET);
        assert!(conn.is_closed());
        assert_eq!(vm.program().len(), 2);
    }

    #[test]
    fn oversized_frame_ends_connection() {
        let (mut conn, peer) = setup();
        let mut vm = Vm::new();
        let mut bytes = RequestHeader {
            method: Method::Merge as i32,
            size: 33,
        }
        .to_bytes();
        bytes.extend([0u8; 33]);
        peer.feed(&bytes);

        conn.tick(&mut vm, BUDGET);
        assert!(conn.is_closed());
        assert!(peer.take_output().is_empty());
        assert!(vm.program().is_empty());
    }
}
