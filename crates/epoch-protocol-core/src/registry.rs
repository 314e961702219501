use crate::codec::CodecResult;
use crate::state::{ConnectionState, StateContext};
use bytes::BytesMut;
use epoch_version::{Capability, Family, ProtocolVersion};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Serverbound => f.write_str("serverbound"),
            Direction::Clientbound => f.write_str("clientbound"),
        }
    }
}

/// A decoded message of one wire scheme.
pub trait Packet: fmt::Debug + Send + Sync + Sized + 'static {
    /// Fieldless tag naming the packet type.
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    /// What decoding and encoding depend on (version, state).
    type Context: fmt::Debug + Send + Sync;

    fn kind(&self) -> Self::Kind;

    /// Write the fields after the packet id.
    fn encode_body(&self, buf: &mut BytesMut, ctx: &Self::Context) -> CodecResult<()>;
}

/// Decodes the fields after the packet id. `NotEnoughData` means the body
/// is incomplete.
pub type DecodeFn<P> = fn(&mut BytesMut, &<P as Packet>::Context) -> CodecResult<P>;

/// Where a registration applies.
pub trait Scope: fmt::Debug + Clone + Send + Sync + 'static {
    type Context;

    fn admits(&self, ctx: &Self::Context) -> bool;
}

/// Scope for id-byte schemes: a set of families, optionally bounded by
/// version and gated on a capability.
#[derive(Debug, Clone)]
pub struct VersionRange {
    families: Vec<Family>,
    since: Option<ProtocolVersion>,
    before: Option<ProtocolVersion>,
    requires: Option<Capability>,
}

impl VersionRange {
    pub fn family(family: Family) -> Self {
        Self::families(&[family])
    }

    pub fn families(families: &[Family]) -> Self {
        Self {
            families: families.to_vec(),
            since: None,
            before: None,
            requires: None,
        }
    }

    /// Only `version` and later.
    pub fn since(mut self, version: ProtocolVersion) -> Self {
        self.since = Some(version);
        self
    }

    /// Only versions strictly older than `version`.
    pub fn before(mut self, version: ProtocolVersion) -> Self {
        self.before = Some(version);
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }
}

impl Scope for VersionRange {
    type Context = ProtocolVersion;

    fn admits(&self, version: &ProtocolVersion) -> bool {
        self.families.contains(&version.family())
            && self.since.map_or(true, |since| version.is_at_least(&since))
            && self.before.map_or(true, |before| !version.is_at_least(&before))
            && self.requires.map_or(true, |cap| cap.is_available_in(version))
    }
}

impl Scope for ConnectionState {
    type Context = StateContext;

    fn admits(&self, ctx: &StateContext) -> bool {
        *self == ctx.state
    }
}

struct Registration<S, P: Packet> {
    scope: S,
    kind: P::Kind,
    decode: DecodeFn<P>,
}

/// Maps `(direction, id)` to decoders and packet kinds back to ids.
///
/// One id may carry several registrations with disjoint scopes; the first
/// one admitting the context wins. Built once at startup and shared
/// read-only between connections.
pub struct PacketRegistry<S, P: Packet> {
    name: &'static str,
    by_id: HashMap<(Direction, i32), Vec<Registration<S, P>>>,
    by_kind: HashMap<(Direction, P::Kind), Vec<(S, i32)>>,
    len: usize,
}

impl<S, P> PacketRegistry<S, P>
where
    S: Scope<Context = P::Context>,
    P: Packet,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            by_id: HashMap::new(),
            by_kind: HashMap::new(),
            len: 0,
        }
    }

    pub fn register(
        &mut self,
        direction: Direction,
        id: i32,
        scope: S,
        kind: P::Kind,
        decode: DecodeFn<P>,
    ) -> &mut Self {
        self.by_kind
            .entry((direction, kind))
            .or_default()
            .push((scope.clone(), id));
        self.by_id
            .entry((direction, id))
            .or_default()
            .push(Registration { scope, kind, decode });
        self.len += 1;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The decoder registered for `id` in this context, if any.
    pub fn decoder(
        &self,
        direction: Direction,
        id: i32,
        ctx: &P::Context,
    ) -> Option<(P::Kind, DecodeFn<P>)> {
        self.by_id
            .get(&(direction, id))?
            .iter()
            .find(|r| r.scope.admits(ctx))
            .map(|r| (r.kind, r.decode))
    }

    pub fn is_known(&self, direction: Direction, id: i32, ctx: &P::Context) -> bool {
        self.decoder(direction, id, ctx).is_some()
    }

    /// The wire id of `kind` in this context.
    pub fn id_of(&self, direction: Direction, kind: P::Kind, ctx: &P::Context) -> Option<i32> {
        self.by_kind
            .get(&(direction, kind))?
            .iter()
            .find(|(scope, _)| scope.admits(ctx))
            .map(|(_, id)| *id)
    }
}

impl<S, P: Packet> fmt::Debug for PacketRegistry<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("name", &self.name)
            .field("registrations", &self.len)
            .finish()
    }
}
