use crate::cipher::Cfb8Cipher;
use crate::error::ProtocolError;
use crate::framing::{PacketDecoder, PacketEncoder};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

const READ_CHUNK: usize = 4096;

/// One client socket with its codec and optional cipher.
///
/// Inbound bytes are decrypted as they arrive and buffered for the decoder;
/// outbound packets are encoded then encrypted as a whole.
pub struct Connection<D, E> {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    read_buf: BytesMut,
    decoder: D,
    encoder: E,
    encryptor: Option<Cfb8Cipher>,
    decryptor: Option<Cfb8Cipher>,
}

impl<D: PacketDecoder, E: PacketEncoder> Connection<D, E> {
    pub fn new(stream: TcpStream, decoder: D, encoder: E) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            peer,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder,
            encoder,
            encryptor: None,
            decryptor: None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }

    pub fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Splice AES-CFB8 into both directions. Key and IV are the secret.
    ///
    /// Bytes already buffered but not yet decoded arrived after the peer
    /// switched on its cipher, so they are decrypted in place.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), ProtocolError> {
        let key: [u8; 16] = shared_secret
            .try_into()
            .map_err(|_| ProtocolError::BadSecretLength(shared_secret.len()))?;
        let mut decryptor = Cfb8Cipher::from_secret(&key);
        if !self.read_buf.is_empty() {
            decryptor.decrypt(&mut self.read_buf[..]);
        }
        self.encryptor = Some(Cfb8Cipher::from_secret(&key));
        self.decryptor = Some(decryptor);
        Ok(())
    }

    /// Make sure at least `n` bytes are buffered and return them without
    /// consuming anything. Used to sniff the first packet before a codec
    /// version is chosen.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        while self.read_buf.len() < n {
            fill(stream, &mut self.read_buf, &mut self.decryptor).await?;
        }
        Ok(&self.read_buf[..n])
    }

    pub async fn read_packet(&mut self) -> Result<D::Packet, ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        loop {
            if let Some(packet) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(packet);
            }
            fill(stream, &mut self.read_buf, &mut self.decryptor).await?;
        }
    }

    pub async fn write_packet(&mut self, packet: &E::Packet) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        let frame = build_frame(&mut self.encoder, packet, &mut self.encryptor)?;
        stream.write_all(&frame).await?;
        Ok(())
    }

    /// Write bytes that bypass the encoder, such as a legacy ping reply.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        let mut data = bytes.to_vec();
        if let Some(ref mut encryptor) = self.encryptor {
            encryptor.encrypt(&mut data);
        }
        stream.write_all(&data).await?;
        Ok(())
    }

    /// Shut the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.encryptor = None;
        self.decryptor = None;
    }

    /// Split into read and write halves for concurrent I/O.
    /// Codec and cipher state move to the matching half.
    pub fn into_split(mut self) -> Result<(ConnectionReader<D>, ConnectionWriter<E>), ProtocolError> {
        let stream = self.stream.take().ok_or(ProtocolError::Closed)?;
        let (read_half, write_half) = stream.into_split();
        Ok((
            ConnectionReader {
                stream: read_half,
                read_buf: self.read_buf,
                decoder: self.decoder,
                decryptor: self.decryptor,
            },
            ConnectionWriter {
                stream: Some(write_half),
                encoder: self.encoder,
                encryptor: self.encryptor,
            },
        ))
    }
}

/// Read half of a split connection.
pub struct ConnectionReader<D> {
    stream: OwnedReadHalf,
    read_buf: BytesMut,
    decoder: D,
    decryptor: Option<Cfb8Cipher>,
}

impl<D: PacketDecoder> ConnectionReader<D> {
    pub async fn read_packet(&mut self) -> Result<D::Packet, ProtocolError> {
        loop {
            if let Some(packet) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(packet);
            }
            fill(&mut self.stream, &mut self.read_buf, &mut self.decryptor).await?;
        }
    }
}

/// Write half of a split connection.
pub struct ConnectionWriter<E> {
    stream: Option<OwnedWriteHalf>,
    encoder: E,
    encryptor: Option<Cfb8Cipher>,
}

impl<E: PacketEncoder> ConnectionWriter<E> {
    pub async fn write_packet(&mut self, packet: &E::Packet) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        let frame = build_frame(&mut self.encoder, packet, &mut self.encryptor)?;
        stream.write_all(&frame).await?;
        Ok(())
    }

    /// Flush and shut down the write side. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.encryptor = None;
    }
}

// === Shared helpers ===

async fn fill<R: AsyncRead + Unpin>(
    stream: &mut R,
    read_buf: &mut BytesMut,
    decryptor: &mut Option<Cfb8Cipher>,
) -> Result<(), ProtocolError> {
    let mut tmp = [0u8; READ_CHUNK];
    let n = stream.read(&mut tmp).await?;
    if n == 0 {
        return Err(ProtocolError::Closed);
    }
    let data = &mut tmp[..n];
    if let Some(ref mut decryptor) = decryptor {
        decryptor.decrypt(data);
    }
    trace!("Read {} bytes", n);
    read_buf.extend_from_slice(data);
    Ok(())
}

fn build_frame<E: PacketEncoder>(
    encoder: &mut E,
    packet: &E::Packet,
    encryptor: &mut Option<Cfb8Cipher>,
) -> Result<BytesMut, ProtocolError> {
    let mut frame = BytesMut::new();
    encoder.encode(packet, &mut frame)?;
    if let Some(ref mut enc) = encryptor {
        enc.encrypt(&mut frame);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_i32, CodecError};
    use crate::framing::{RawDecoder, RawEncoder};
    use crate::registry::{Direction, Packet, PacketRegistry, VersionRange};
    use bytes::BufMut;
    use epoch_version::{Family, ProtocolVersion, B1_7};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Debug, PartialEq)]
    struct Number(i32);

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
    enum NumberKind {
        Number,
    }

    impl Packet for Number {
        type Kind = NumberKind;
        type Context = ProtocolVersion;

        fn kind(&self) -> NumberKind {
            NumberKind::Number
        }

        fn encode_body(&self, buf: &mut BytesMut, _: &ProtocolVersion) -> Result<(), CodecError> {
            buf.put_i32(self.0);
            Ok(())
        }
    }

    type TestConnection = Connection<RawDecoder<Number>, RawEncoder<Number>>;

    fn registry() -> Arc<PacketRegistry<VersionRange, Number>> {
        let mut registry: PacketRegistry<VersionRange, Number> = PacketRegistry::new("test");
        for direction in [Direction::Serverbound, Direction::Clientbound] {
            registry.register(
                direction,
                0x10,
                VersionRange::family(Family::Beta),
                NumberKind::Number,
                |buf, _| Ok(Number(read_i32(buf)?)),
            );
        }
        Arc::new(registry)
    }

    fn wrap(stream: TcpStream, inbound: Direction, outbound: Direction) -> TestConnection {
        let registry = registry();
        Connection::new(
            stream,
            RawDecoder::new(registry.clone(), inbound, B1_7),
            RawEncoder::new(registry, outbound, B1_7),
        )
    }

    async fn socket_pair() -> (TestConnection, TestConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (
            wrap(server, Direction::Serverbound, Direction::Clientbound),
            wrap(client, Direction::Clientbound, Direction::Serverbound),
        )
    }

    #[tokio::test]
    async fn test_packets_cross_the_socket() {
        let (mut server, mut client) = socket_pair().await;
        client.write_packet(&Number(1)).await.unwrap();
        client.write_packet(&Number(2)).await.unwrap();
        assert_eq!(server.read_packet().await.unwrap(), Number(1));
        assert_eq!(server.read_packet().await.unwrap(), Number(2));
        assert_eq!(server.peek(0).await.unwrap(), &[] as &[u8]);
    }

    #[tokio::test]
    async fn test_encrypted_stream() {
        let (mut server, mut client) = socket_pair().await;
        let secret = [9u8; 16];
        client.enable_encryption(&secret).unwrap();
        server.enable_encryption(&secret).unwrap();

        client.write_packet(&Number(0x1234)).await.unwrap();
        assert_eq!(server.read_packet().await.unwrap(), Number(0x1234));
        server.write_packet(&Number(-5)).await.unwrap();
        assert_eq!(client.read_packet().await.unwrap(), Number(-5));
    }

    #[tokio::test]
    async fn test_buffered_bytes_are_decrypted_on_upgrade() {
        let (mut server, mut client) = socket_pair().await;
        let secret = [3u8; 16];

        // Plain packet and encrypted packet land in one read.
        client.write_packet(&Number(1)).await.unwrap();
        client.enable_encryption(&secret).unwrap();
        client.write_packet(&Number(2)).await.unwrap();

        server.peek(10).await.unwrap();
        assert_eq!(server.read_packet().await.unwrap(), Number(1));
        server.enable_encryption(&secret).unwrap();
        assert_eq!(server.read_packet().await.unwrap(), Number(2));
    }

    #[tokio::test]
    async fn test_bad_secret_length() {
        let (mut server, _client) = socket_pair().await;
        assert!(matches!(
            server.enable_encryption(&[0u8; 8]),
            Err(ProtocolError::BadSecretLength(8))
        ));
        assert!(!server.is_encrypted());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut server, mut client) = socket_pair().await;
        server.close().await;
        server.close().await;
        assert!(server.is_closed());
        assert!(matches!(
            server.write_packet(&Number(1)).await,
            Err(ProtocolError::Closed)
        ));
        assert!(client.read_packet().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (server, mut client) = socket_pair().await;
        let (mut reader, mut writer) = server.into_split().unwrap();
        client.write_packet(&Number(10)).await.unwrap();
        assert_eq!(reader.read_packet().await.unwrap(), Number(10));
        writer.write_packet(&Number(11)).await.unwrap();
        assert_eq!(client.read_packet().await.unwrap(), Number(11));
        writer.close().await;
        writer.close().await;
    }
}
