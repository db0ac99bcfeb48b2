//! Async client for the rvm wire protocol.
//!
//! Wraps a tokio [`TcpStream`] and implements the chunking contracts the
//! server expects: programs are merged two instructions per frame, inserted
//! one instruction per frame with an advancing start index, read back two
//! instructions per page and dumped eight words per page. Multi-frame
//! operations are pipelined: a window of frames is written before any
//! response is read.

use crate::network::protocol::{
    DeleteRange, InsertHeader, Method, Payload, ProtocolError, Range, Request, Response,
    ResponseHeader, Status, DUMP_CHUNK, GET_CHUNK, HEADER_SIZE, INSERT_CHUNK, PAYLOAD_SIZE,
};
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::program::Program;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Frames written before their responses are collected.
const PIPELINE_WINDOW: usize = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{method} rejected with status {status:?}")]
    Rejected { method: Method, status: Status },

    #[error("undecodable response: {0}")]
    Decode(#[from] DecodeError),

    #[error("malformed response: {0}")]
    Malformed(&'static str),

    #[error("invalid request: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A connection to an rvm server.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Writes one request frame.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        self.stream.write_all(&request.to_bytes()).await?;
        Ok(())
    }

    /// Reads one response frame.
    pub async fn recv(&mut self) -> Result<Response, ClientError> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;
        let header = ResponseHeader::from_bytes(&header)?;

        let size = header.size as usize;
        if size > PAYLOAD_SIZE {
            return Err(ClientError::Malformed("payload larger than a frame"));
        }
        let mut payload = [0u8; PAYLOAD_SIZE];
        self.stream.read_exact(&mut payload[..size]).await?;

        Ok(Response::new(
            header.status,
            Payload::from_slice(&payload[..size])?,
        ))
    }

    pub async fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.send(request).await?;
        self.recv().await
    }

    /// Sends an arbitrary method value and payload.
    pub async fn send_raw(&mut self, method: i32, payload: &[u8]) -> Result<Response, ClientError> {
        let request = Request {
            method,
            payload: Payload::from_slice(payload)?,
        };
        self.call(&request).await
    }

    /// Sends `requests` in pipelined windows and fails on the first
    /// non-success response.
    async fn pipeline(&mut self, requests: &[Request]) -> Result<(), ClientError> {
        for window in requests.chunks(PIPELINE_WINDOW) {
            let mut bytes = Vec::new();
            for request in window {
                request.encode(&mut bytes);
            }
            self.stream.write_all(&bytes).await?;

            let mut rejected = None;
            for request in window {
                let response = self.recv().await?;
                if rejected.is_none() && !response.is_success() {
                    rejected = Some(rejection(request, &response));
                }
            }
            if let Some(err) = rejected {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Appends `insts` to the server's program, two per frame.
    pub async fn merge_all(&mut self, insts: &[Instruction]) -> Result<(), ClientError> {
        let mut requests = Vec::with_capacity(insts.len().div_ceil(GET_CHUNK));
        for chunk in insts.chunks(GET_CHUNK) {
            let mut payload = Payload::new();
            for inst in chunk {
                payload.push(inst)?;
            }
            requests.push(Request::new(Method::Merge, payload));
        }
        self.pipeline(&requests).await
    }

    /// Inserts `insts` at `start`, one instruction per frame.
    pub async fn insert(&mut self, start: u64, insts: &[Instruction]) -> Result<(), ClientError> {
        let mut requests = Vec::with_capacity(insts.len());
        let mut start = start;
        for chunk in insts.chunks(INSERT_CHUNK) {
            let mut payload = Payload::new();
            payload.push(&InsertHeader {
                start,
                count: chunk.len() as u64,
            })?;
            for inst in chunk {
                payload.push(inst)?;
            }
            requests.push(Request::new(Method::Insert, payload));
            start += chunk.len() as u64;
        }
        self.pipeline(&requests).await
    }

    /// Starts execution. The server answers before running the program.
    pub async fn exec(&mut self) -> Result<(), ClientError> {
        self.call_ok(Request::bare(Method::Exec)).await.map(drop)
    }

    pub async fn reset(&mut self) -> Result<(), ClientError> {
        self.call_ok(Request::bare(Method::Reset)).await.map(drop)
    }

    /// Reads one page of at most two instructions. Reading past the end
    /// yields an empty page.
    pub async fn get(&mut self, offset: u32, count: u32) -> Result<Vec<Instruction>, ClientError> {
        let request = Request::new(Method::Get, Payload::of(&Range { offset, count })?);
        let response = self.call(&request).await?;
        match response.status {
            Status::Success => Ok(response.payload.decode_all()?),
            Status::EndOfData => Ok(Vec::new()),
            _ => Err(rejection(&request, &response)),
        }
    }

    /// Downloads the whole program page by page.
    pub async fn get_all(&mut self) -> Result<Program, ClientError> {
        let mut program = Vec::new();
        loop {
            let offset = u32::try_from(program.len())
                .map_err(|_| ClientError::Malformed("program longer than u32 offsets"))?;
            let range = Range {
                offset,
                count: GET_CHUNK as u32,
            };
            let response = self
                .call(&Request::new(Method::Get, Payload::of(&range)?))
                .await?;
            if !response.is_success() || response.payload.is_empty() {
                break;
            }
            program.extend(response.payload.decode_all::<Instruction>()?);
        }
        Ok(program.into_iter().collect())
    }

    /// Deletes the inclusive range `[start, end]` and returns how many
    /// instructions the server removed.
    pub async fn delete(&mut self, start: u32, end: u32) -> Result<u32, ClientError> {
        let payload = Payload::of(&DeleteRange { start, end })?;
        let response = self.call_ok(Request::new(Method::Delete, payload)).await?;
        Ok(u32::from_bytes(response.payload.as_slice())?)
    }

    /// Reads up to `count` memory words from address 0, eight per page.
    pub async fn dump(&mut self, count: usize) -> Result<Vec<i32>, ClientError> {
        let mut words = Vec::with_capacity(count);
        while words.len() < count {
            let range = Range {
                offset: words.len() as u32,
                count: (count - words.len()).min(DUMP_CHUNK) as u32,
            };
            let response = self
                .call(&Request::new(Method::Dump, Payload::of(&range)?))
                .await?;
            if !response.is_success() || response.payload.is_empty() {
                break;
            }
            words.extend(response.payload.decode_all::<i32>()?);
        }
        Ok(words)
    }

    async fn call_ok(&mut self, request: Request) -> Result<Response, ClientError> {
        let response = self.call(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(rejection(&request, &response))
        }
    }
}

fn rejection(request: &Request, response: &Response) -> ClientError {
    match request.method() {
        Ok(method) => ClientError::Rejected {
            method,
            status: response.status,
        },
        Err(_) => ClientError::Malformed("response to an unknown method"),
    }
}
