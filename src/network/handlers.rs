//! Command handlers.
//!
//! Each handler takes the shared [`Vm`] and one request payload and produces
//! exactly one [`Response`]. Handlers never touch the network; the connection
//! state machine owns buffering and flushing. Store errors become `FAILURE`
//! responses with the store left unchanged.

use crate::network::protocol::{
    DeleteRange, InsertHeader, Method, Payload, Range, Request, Response, Status, DUMP_CHUNK,
    GET_CHUNK, INSERT_HEADER_SIZE,
};
use crate::types::encoding::Decode;
use crate::virtual_machine::isa::{Instruction, INSTRUCTION_SIZE};
use crate::virtual_machine::vm::memory::MEMORY_SIZE;
use crate::virtual_machine::vm::Vm;
use crate::{debug, warn};

/// What the connection should do once the response has been sent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Next {
    /// Go back to reading requests.
    Respond,
    /// Start driving the VM.
    Execute,
}

/// Routes a request to its handler.
pub fn dispatch(vm: &mut Vm, request: &Request) -> (Response, Next) {
    let payload = request.payload.as_slice();
    let method = match request.method() {
        Ok(method) => method,
        Err(raw) => {
            warn!("unknown method {raw}");
            return (Response::status(Status::UnknownMethod), Next::Respond);
        }
    };
    debug!("{method} with {} byte payload", payload.len());

    match method {
        Method::Merge => (handle_merge(vm, payload), Next::Respond),
        Method::Insert => (handle_insert(vm, payload), Next::Respond),
        Method::Exec => handle_exec(vm),
        Method::Reset => (handle_reset(vm), Next::Respond),
        Method::Get => (handle_get(vm, payload), Next::Respond),
        Method::Delete => (handle_delete(vm, payload), Next::Respond),
        Method::Dump => (handle_dump(vm, payload), Next::Respond),
    }
}

/// Decodes a payload made only of whole instructions.
fn decode_instructions(payload: &[u8]) -> Option<Vec<Instruction>> {
    if payload.len() % INSTRUCTION_SIZE != 0 {
        return None;
    }
    let mut input = payload;
    let mut insts = Vec::with_capacity(payload.len() / INSTRUCTION_SIZE);
    while !input.is_empty() {
        insts.push(Instruction::decode(&mut input).ok()?);
    }
    Some(insts)
}

/// Appends the payload's instructions to the program.
pub fn handle_merge(vm: &mut Vm, payload: &[u8]) -> Response {
    let Some(insts) = decode_instructions(payload) else {
        warn!("MERGE payload of {} bytes is not whole instructions", payload.len());
        return Response::failure();
    };
    match vm.program_mut().merge(&insts) {
        Ok(()) => Response::status(Status::Success),
        Err(err) => {
            warn!("MERGE failed: {err}");
            Response::failure()
        }
    }
}

/// Splices the payload's instructions in at the requested position.
pub fn handle_insert(vm: &mut Vm, payload: &[u8]) -> Response {
    let Some((prefix, body)) = payload.split_at_checked(INSERT_HEADER_SIZE) else {
        warn!("INSERT payload of {} bytes has no position prefix", payload.len());
        return Response::failure();
    };
    let Ok(header) = InsertHeader::from_bytes(prefix) else {
        warn!("INSERT position prefix is malformed");
        return Response::failure();
    };

    let wanted = usize::try_from(header.count)
        .ok()
        .and_then(|count| count.checked_mul(INSTRUCTION_SIZE));
    if wanted != Some(body.len()) {
        warn!(
            "INSERT declares {} instructions but carries {} bytes",
            header.count,
            body.len()
        );
        return Response::failure();
    }
    let Some(insts) = decode_instructions(body) else {
        warn!("INSERT body of {} bytes is not whole instructions", body.len());
        return Response::failure();
    };
    let Ok(start) = usize::try_from(header.start) else {
        warn!("INSERT position {} does not fit in memory", header.start);
        return Response::failure();
    };

    match vm.program_mut().insert(&insts, start) {
        Ok(()) => Response::status(Status::Success),
        Err(err) => {
            warn!("INSERT failed: {err}");
            Response::failure()
        }
    }
}

/// Resets the registers and asks the connection to run the program.
pub fn handle_exec(vm: &mut Vm) -> (Response, Next) {
    vm.reset_registers();
    (Response::status(Status::Success), Next::Execute)
}

/// Drops the whole program and resets the registers.
pub fn handle_reset(vm: &mut Vm) -> Response {
    vm.program_mut().clear();
    vm.reset_registers();
    Response::status(Status::Success)
}

/// Returns up to [`GET_CHUNK`] instructions starting at the requested offset.
///
/// A read that starts at or past the end answers `END_OF_DATA`.
pub fn handle_get(vm: &mut Vm, payload: &[u8]) -> Response {
    let Ok(range) = Range::from_bytes(payload) else {
        return Response::failure();
    };

    let count = (range.count as usize).min(GET_CHUNK);
    let mut chunk = [Instruction::default(); GET_CHUNK];
    let read = vm.program().read(&mut chunk[..count], range.offset as usize);
    if read == 0 {
        return Response::status(Status::EndOfData);
    }

    let mut out = Payload::new();
    for inst in &chunk[..read] {
        if out.push(inst).is_err() {
            return Response::failure();
        }
    }
    Response::success(out)
}

/// Removes an inclusive instruction range and reports how many were removed.
pub fn handle_delete(vm: &mut Vm, payload: &[u8]) -> Response {
    let Ok(range) = DeleteRange::from_bytes(payload) else {
        return Response::failure();
    };

    match vm
        .program_mut()
        .delete(range.start as usize, range.end as usize)
    {
        Ok(removed) => match Payload::of(&(removed as u32)) {
            Ok(out) => Response::success(out),
            Err(_) => Response::failure(),
        },
        Err(err) => {
            warn!("DELETE failed: {err}");
            Response::failure()
        }
    }
}

/// Returns up to [`DUMP_CHUNK`] memory words starting at the requested offset.
pub fn handle_dump(vm: &mut Vm, payload: &[u8]) -> Response {
    let Ok(range) = Range::from_bytes(payload) else {
        return Response::failure();
    };

    let offset = range.offset as usize;
    let count = (range.count as usize).min(DUMP_CHUNK);
    if offset.saturating_add(count) >= MEMORY_SIZE {
        return Response::failure();
    }

    let mut out = Payload::new();
    for word in vm.dump(offset, count) {
        if out.push(word).is_err() {
            return Response::failure();
        }
    }
    Response::success(out)
}
