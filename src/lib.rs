//! # Blocksync
//!
//! Client side of the peer-to-peer block synchronization protocol: given a
//! starting tipset key and a depth, fetch a contiguous chain of tipsets
//! walking backwards towards genesis from whichever tracked peer answers
//! first.
//!
//! ## Tracker
//!
//! The peer tracker scores peers by observed latency and failure count and
//! hands the request engine a preference-sorted order to try.
//!
//! ## Channel
//!
//! Requests and responses are CBOR values inside length-delimited frames on
//! a stream the host already holds a connection for. Reads are throttled so
//! a peer cannot flood the client; writes run under a per-write deadline.
//!
//! ## Client
//!
//! [BlockSync](client::BlockSync) dispatches a request to one peer at a
//! time, interprets the response status, validates the parent linkage of
//! returned chains and reports each round trip back to the tracker.

#[macro_use]
extern crate serde_derive;

pub mod block_service;
pub mod chain;
pub mod channel;
pub mod client;
pub mod clock;
pub mod constants;
pub mod fetcher;
pub mod graphsync;
pub mod host;
pub mod id;
pub mod protocol;
pub mod throttle;
pub mod tracker;
pub mod validate;

mod integration_test;

use id::{Cid, PeerId};
use protocol::Status;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Decode(serde_cbor::Error),

    // request engine errors
    Cancelled,
    NoPeers,
    NoConn(PeerId),
    NoProtocol(PeerId),
    Transport(PeerId, String),
    MalformedFrame(PeerId, String),
    Status(PeerId, Status, String),
    AllPeersFailed(&'static str, Box<Error>),

    // validation errors
    EmptyChain,
    BadChain(usize, usize),
    InvalidTipset(String),
    InvalidBundle(String),

    // message fetch errors
    UnsolicitedBlock(Cid),
    DuplicateBlock(Cid),
    IncompleteFetch,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            Error::Decode(err) => Some(err),
            Error::AllPeersFailed(_, err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl std::convert::From<serde_cbor::Error> for Error {
    fn from(error: serde_cbor::Error) -> Self {
        Error::Decode(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(err) => write!(f, "io error: {}", err),
            Error::Decode(err) => write!(f, "decode error: {}", err),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::NoPeers => write!(f, "no peers available"),
            Error::NoConn(peer) => write!(f, "no connection to peer {}", peer),
            Error::NoProtocol(peer) => {
                write!(f, "peer {} supports no known sync protocols", peer)
            }
            Error::Transport(peer, cause) => {
                write!(f, "transport error for peer {}: {}", peer, cause)
            }
            Error::MalformedFrame(peer, cause) => {
                write!(f, "malformed frame from peer {}: {}", peer, cause)
            }
            Error::Status(peer, status, message) => match status {
                Status::InternalError => {
                    write!(f, "block sync peer {} errored: {}", peer, message)
                }
                Status::BadRequest => {
                    write!(f, "block sync request invalid: {}", message)
                }
                status => write!(f, "peer {} replied {}: {}", peer, status, message),
            },
            Error::AllPeersFailed(operation, cause) => {
                write!(f, "{} failed with all peers: {}", operation, cause)
            }
            Error::EmptyChain => {
                write!(f, "got no blocks in successful blocksync response")
            }
            Error::BadChain(current, next) => {
                write!(f, "parents of tipset[{}] were not tipset[{}]", current, next)
            }
            Error::InvalidTipset(cause) => write!(f, "invalid tipset: {}", cause),
            Error::InvalidBundle(cause) => write!(f, "invalid tipset bundle: {}", cause),
            Error::UnsolicitedBlock(cid) => {
                write!(f, "received unsolicited block {}", cid)
            }
            Error::DuplicateBlock(cid) => write!(f, "received duplicate block {}", cid),
            Error::IncompleteFetch => write!(f, "failed to fetch all messages"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
