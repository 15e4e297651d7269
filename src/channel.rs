//! Length-delimited framed channel over a raw peer stream.
//!
//! A [Channel] wraps a stream obtained from the host and splits it into a
//! [Sender] and a [Receiver] half. Frames carry CBOR payloads; the receive
//! side is throttled so a peer cannot flood the client, and every write runs
//! under the per-write deadline.

use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::clock::Clock;
use crate::constants::{READ_THROTTLE_BYTES, READ_THROTTLE_WINDOW, WRITE_DEADLINE};
use crate::host::RawStream;
use crate::throttle::ThrottledReader;
use crate::{Error, Result};

pub type Reader = FramedRead<ThrottledReader<ReadHalf<RawStream>>, LengthDelimitedCodec>;

pub type Writer = FramedWrite<WriteHalf<RawStream>, LengthDelimitedCodec>;

pub struct Channel<I, O> {
    stream: RawStream,
    clock: Arc<dyn Clock>,
    ghost: PhantomData<(I, O)>,
}

impl<I, O> Channel<I, O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    pub fn wrap(stream: RawStream, clock: Arc<dyn Clock>) -> Channel<I, O> {
        Channel { stream, clock, ghost: PhantomData }
    }

    pub fn split(self) -> (Sender<I>, Receiver<O>) {
        let (reader, writer) = tokio::io::split(self.stream);

        let reader = FramedRead::new(
            ThrottledReader::new(reader, READ_THROTTLE_BYTES, READ_THROTTLE_WINDOW, self.clock),
            LengthDelimitedCodec::new(),
        );
        let writer = FramedWrite::new(writer, LengthDelimitedCodec::new());

        (Sender { writer, ghost: PhantomData }, Receiver { reader, ghost: PhantomData })
    }
}

pub struct Sender<I> {
    writer: Writer,
    ghost: PhantomData<I>,
}

impl<I: Serialize> Sender<I> {
    /// Encodes and writes one frame under the per-write deadline.
    pub async fn send(&mut self, item: &I) -> Result<()> {
        let encoded = serde_cbor::to_vec(item)?;
        match timeout(WRITE_DEADLINE, self.writer.send(Bytes::from(encoded))).await {
            Ok(result) => result.map_err(Error::IO),
            Err(_) => Err(Error::IO(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ))),
        }
    }
}

pub struct Receiver<O> {
    reader: Reader,
    ghost: PhantomData<O>,
}

impl<O: DeserializeOwned> Receiver<O> {
    /// Reads one frame, or `None` when the peer closed the stream.
    pub async fn recv(&mut self) -> Result<Option<O>> {
        match self.reader.try_next().await.map_err(Error::IO)? {
            Some(frame) => Ok(Some(serde_cbor::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::SystemClock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    pub struct Request(String);
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    pub struct Response(String);

    #[tokio::test]
    async fn test_send_recv() {
        let (near, far) = tokio::io::duplex(4096);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let server_clock = clock.clone();
        let server = tokio::spawn(async move {
            let channel: Channel<Response, Request> =
                Channel::wrap(Box::new(far), server_clock);
            let (mut sender, mut receiver) = channel.split();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Request(String::from("123"))));

            sender.send(&Response(String::from("321"))).await.unwrap();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Request(String::from("456"))));

            sender.send(&Response(String::from("654"))).await.unwrap();
        });

        let client = tokio::spawn(async move {
            let channel: Channel<Request, Response> = Channel::wrap(Box::new(near), clock);
            let (mut sender, mut receiver) = channel.split();

            sender.send(&Request(String::from("123"))).await.unwrap();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Response(String::from("321"))));

            sender.send(&Request(String::from("456"))).await.unwrap();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Response(String::from("654"))));
        });

        client.await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_on_closed_stream() {
        let (near, far) = tokio::io::duplex(4096);
        drop(far);

        let channel: Channel<Request, Response> =
            Channel::wrap(Box::new(near), Arc::new(SystemClock));
        let (_sender, mut receiver) = channel.split();

        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg, None);
    }

    #[tokio::test]
    async fn test_recv_rejects_malformed_frame() {
        use tokio::io::AsyncWriteExt;

        let (near, mut far) = tokio::io::duplex(4096);

        // a frame whose payload is not valid CBOR for `Response`
        far.write_all(&[0, 0, 0, 2, 0xff, 0xff]).await.unwrap();
        far.shutdown().await.unwrap();

        let channel: Channel<Request, Response> =
            Channel::wrap(Box::new(near), Arc::new(SystemClock));
        let (_sender, mut receiver) = channel.split();

        match receiver.recv().await {
            Err(Error::Decode(_)) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
