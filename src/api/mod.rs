// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;
use thiserror::Error;

/// A point in time, measured from an arbitrary epoch chosen by the embedder.
///
/// The library never reads a clock. Every entry point takes the current time, and all timer
/// deadlines are expressed in this type.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SctpTime(Duration);

impl SctpTime {
    pub const fn zero() -> SctpTime {
        SctpTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> SctpTime {
        SctpTime(Duration::MAX)
    }

    pub const fn from_millis(ms: u64) -> SctpTime {
        SctpTime(Duration::from_millis(ms))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Add<Duration> for SctpTime {
    type Output = SctpTime;
    fn add(self, rhs: Duration) -> SctpTime {
        SctpTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for SctpTime {
    type Output = SctpTime;
    fn sub(self, rhs: Duration) -> SctpTime {
        SctpTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<SctpTime> for SctpTime {
    type Output = Duration;
    fn sub(self, rhs: SctpTime) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<Duration> for SctpTime {
    fn from(value: Duration) -> Self {
        SctpTime(value)
    }
}

impl From<SctpTime> for Duration {
    fn from(value: SctpTime) -> Self {
        value.0
    }
}

/// Stream Identifier
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one association from the application's point of view: the gate (application
/// instance) that owns it and an association id that is unique within the [`crate::Sctp`] stack.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AppHandle {
    pub gate: u32,
    pub assoc_id: u32,
}

impl AppHandle {
    pub fn new(gate: u32, assoc_id: u32) -> Self {
        Self { gate, assoc_id }
    }
}

impl fmt::Display for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.gate, self.assoc_id)
    }
}

/// Per-message send properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOptions {
    /// If set, the message is delivered without regard to stream sequence numbers.
    pub unordered: bool,

    /// Partial reliability: the message is abandoned if it hasn't been fully acknowledged this
    /// long after it was handed to the library.
    pub lifetime: Option<Duration>,

    /// Partial reliability: the message is abandoned after this many retransmissions of any of its
    /// fragments.
    pub max_retransmissions: Option<u16>,
}

/// An outbound user message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub stream_id: StreamId,
    pub ppid: PpId,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(stream_id: StreamId, ppid: PpId, payload: Vec<u8>) -> Self {
        Self { stream_id, ppid, payload }
    }
}

/// A reassembled inbound user message, as delivered to the application.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMessage {
    pub stream_id: StreamId,
    pub ssn: u16,
    pub ppid: PpId,
    /// The TSN of the first fragment of the message.
    pub tsn: u32,
    pub unordered: bool,
    pub payload: Vec<u8>,
}

/// Parameters of an active open.
#[derive(Clone, Debug, PartialEq)]
pub struct AssociateRequest {
    pub local_port: u16,
    pub local_addresses: Vec<IpAddr>,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    /// Overrides [`Options::outbound_streams`].
    pub outbound_streams: Option<u16>,
    /// Overrides [`Options::inbound_streams`].
    pub inbound_streams: Option<u16>,
}

/// Parameters of a passive open.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenRequest {
    pub local_port: u16,
    pub local_addresses: Vec<IpAddr>,
    /// Overrides [`Options::outbound_streams`].
    pub outbound_streams: Option<u16>,
    /// Overrides [`Options::inbound_streams`].
    pub inbound_streams: Option<u16>,
}

/// Commands an application issues against one association.
#[derive(Clone, Debug, PartialEq)]
pub enum AppCommand {
    /// Active open towards a peer.
    Associate(AssociateRequest),
    /// Listen for incoming associations. Each accepted association gets a fresh assoc id under
    /// the same gate, while the listener keeps listening.
    OpenPassive(ListenRequest),
    Send { message: Message, options: SendOptions },
    /// Pulls the next reassembled message of a stream, after an
    /// [`Indication::DataNotification`].
    Receive { stream_id: StreamId },
    /// Graceful close, same as `Shutdown` for an established association, but also removes a
    /// listener or an association that isn't established yet.
    Close,
    Abort,
    Shutdown,
    StatusRequest,
    /// Makes the path with the given remote address the primary path.
    SetPrimary(IpAddr),
}

/// Notifications sent to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum Indication {
    Established {
        remote_address: IpAddr,
        remote_port: u16,
        inbound_streams: u16,
        outbound_streams: u16,
    },
    /// A complete message, emitted when [`Options::deliver_immediately`] is set or as the answer
    /// to [`AppCommand::Receive`].
    Data(ReceivedMessage),
    /// A complete message is waiting to be pulled with [`AppCommand::Receive`].
    DataNotification { stream_id: StreamId, ssn: u16, tsn: u32, length: usize },
    /// The peer started a graceful shutdown.
    PeerClosed,
    /// The association has been gracefully closed and removed.
    Closed,
    /// The association has been aborted, locally or by the peer.
    Aborted { reason: String },
    /// A SHUTDOWN chunk has been received; no more data will arrive from the peer.
    ShutdownReceived,
    Status(AssociationStatus),
    SendQueueFull { queued_bytes: usize },
    SendQueueAbated { queued_bytes: usize },
    /// All paths failed or the association retransmission limit was reached.
    ConnectionLost { reason: String },
    /// The association could not be established in time.
    TimedOut,
    PathStatus { address: IpAddr, active: bool },
    /// The peer restarted the association.
    Restarted,
    /// A non-fatal error.
    Error { kind: ErrorKind, message: String },
}

/// Everything the library wants the embedder to do.
#[derive(Clone, Debug, PartialEq)]
pub enum SctpEvent {
    SendPacket(Datagram),
    Indication(AppHandle, Indication),
}

/// An SCTP packet carried in an IP datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub payload: Vec<u8>,
    /// Set by lower layers that detected a bit error, in which case the payload can't be trusted.
    pub bit_error: bool,
}

impl Datagram {
    pub fn new(src: IpAddr, dst: IpAddr, payload: Vec<u8>) -> Self {
        Self { src, dst, payload, bit_error: false }
    }
}

/// The connection states of an association.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AssociationState {
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationState::Closed => "CLOSED",
            AssociationState::CookieWait => "COOKIE_WAIT",
            AssociationState::CookieEchoed => "COOKIE_ECHOED",
            AssociationState::Established => "ESTABLISHED",
            AssociationState::ShutdownPending => "SHUTDOWN_PENDING",
            AssociationState::ShutdownSent => "SHUTDOWN_SENT",
            AssociationState::ShutdownReceived => "SHUTDOWN_RECEIVED",
            AssociationState::ShutdownAckSent => "SHUTDOWN_ACK_SENT",
        };
        f.write_str(name)
    }
}

/// Snapshot of one destination path.
#[derive(Clone, Debug, PartialEq)]
pub struct PathStatus {
    pub address: IpAddr,
    pub active: bool,
    pub confirmed: bool,
    pub cwnd: usize,
    pub ssthresh: usize,
    pub outstanding_bytes: usize,
    pub srtt: Option<Duration>,
    pub rto: Duration,
    pub error_count: u32,
}

/// Snapshot of an association, returned by [`crate::Sctp::status`] and
/// [`Indication::Status`].
#[derive(Clone, Debug, PartialEq)]
pub struct AssociationStatus {
    pub state: AssociationState,
    pub local_port: u16,
    pub remote_port: u16,
    pub primary_path: Option<IpAddr>,
    pub paths: Vec<PathStatus>,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub local_rwnd: u32,
    pub peer_rwnd: u32,
    pub queued_send_bytes: usize,
    pub queued_received_bytes: usize,
    pub outstanding_bytes: usize,
}

/// Represents the category of an error that has occurred.
///
/// This enum is used in [`Indication::Error`] and in log output to describe the nature of a
/// protocol-level failure. Errors in direct application commands are reported as [`SctpError`]
/// instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Too many retransmissions or timeouts, typically a loss of connectivity to the peer.
    TooManyRetries,

    /// A command that requires an established association was issued too early or too late.
    NotConnected,

    /// Parsing of an incoming SCTP packet or its parameters failed.
    ParseFailed,

    /// Chunks were received in an unexpected sequence.
    WrongSequence,

    /// The peer reported an issue with an `ERROR` or `ABORT` chunk.
    PeerReported,

    /// The peer violated the protocol.
    ProtocolViolation,

    /// Buffers have been exhausted.
    ResourceExhaustion,

    /// A COOKIE-ECHO arrived after the cookie's lifetime had passed.
    StaleCookie,

    /// The requested operation is not supported.
    UnsupportedOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors returned synchronously from [`crate::Sctp::handle_command`].
#[derive(Debug, Error, PartialEq)]
pub enum SctpError {
    #[error("No association with handle {0}")]
    UnknownAssociation(AppHandle),

    #[error("An association with handle {0} already exists")]
    AlreadyExists(AppHandle),

    #[error("The association is not connected")]
    NotConnected,

    #[error("Stream {0} is not a negotiated outbound stream")]
    InvalidStream(StreamId),

    #[error("Messages must have a payload")]
    EmptyPayload,

    #[error("The operation is not supported in the current state")]
    UnsupportedOperation,
}

/// Stream scheduling disciplines, picking which send stream feeds the next DATA chunk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StreamSchedulerKind {
    /// Cycle over the streams with pending data, one chunk at a time.
    #[default]
    RoundRobin,
    /// Like `RoundRobin`, but stay on a stream for the rest of a packet.
    RoundRobinPacket,
    /// Pick a random stream for every chunk.
    Random,
    /// Pick a random stream per packet.
    RandomPacket,
    /// Lowest configured priority value wins, ties broken round-robin.
    Priority,
    /// Prefer the stream that has been served the fewest bytes.
    FairBandwidth,
    /// Like `FairBandwidth`, but stay on a stream for the rest of a packet.
    FairBandwidthPacket,
    /// The stream whose head message was enqueued first wins.
    Fcfs,
    /// Streams are pinned to destination addresses by [`Options::stream_path_map`].
    PathMapToPath,
    /// Streams are spread over the active paths by stream id modulo the number of active paths.
    PathMapByHash,
}

/// Congestion control algorithms.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CongestionControlKind {
    /// Slow start, congestion avoidance and fast recovery of RFC 4960 section 7.
    #[default]
    Rfc4960,
}

/// User configurable options, cloned into every association.
#[derive(Clone, Debug)]
pub struct Options {
    /// Path MTU, the maximum size of generated SCTP packets.
    pub mtu: usize,

    /// Receive buffer size, announced as the initial advertised receiver window.
    pub local_rwnd: u32,

    /// Silly window syndrome avoidance limit. While the free receive window is below this value,
    /// an advertised window of 1 is reported. Zero disables the mechanism.
    pub sws_limit: u32,

    /// Maximum number of bytes in the send queue. Zero means unlimited.
    pub send_queue_limit: usize,

    /// Number of inbound streams announced in INIT/INIT-ACK.
    pub inbound_streams: u16,

    /// Number of outbound streams announced in INIT/INIT-ACK.
    pub outbound_streams: u16,

    /// Initial retransmission timeout of every path.
    pub rto_initial: Duration,

    /// Minimum retransmission timeout.
    pub rto_min: Duration,

    /// Maximum retransmission timeout.
    pub rto_max: Duration,

    /// Initial timeout of INIT and COOKIE-ECHO retransmissions.
    pub init_rto: Duration,

    /// Upper bound of the exponential backoff of INIT and COOKIE-ECHO retransmissions.
    pub init_rto_max: Duration,

    /// Number of times INIT or COOKIE-ECHO is retransmitted before giving up.
    pub max_init_retransmits: u32,

    /// Association-wide error threshold.
    pub assoc_max_retrans: u32,

    /// Per-path error threshold, after which a path is marked inactive.
    pub path_max_retrans: u32,

    /// How long an issued state cookie remains valid.
    pub valid_cookie_lifetime: Duration,

    /// Heartbeat interval on idle paths. The actual interval is this value plus the path RTO,
    /// with jitter applied.
    pub hb_interval: Duration,

    /// Maximum time a SACK may be delayed.
    pub sack_delay: Duration,

    /// Number of packets with DATA after which a SACK is sent without delay.
    pub sack_frequency: u32,

    /// Number of gap reports after which a missing chunk is fast retransmitted.
    pub num_gap_reports: u32,

    /// Coalesce small messages while data is outstanding.
    pub nagle_enabled: bool,

    /// Maximum number of packets sent per path in one burst.
    pub max_burst: usize,

    /// Maximum time a graceful shutdown may take before it's turned into an abort.
    pub shutdown_guard_timeout: Duration,

    pub stream_scheduler: StreamSchedulerKind,

    pub congestion_control: CongestionControlKind,

    /// Static stream to destination address mapping, used by
    /// [`StreamSchedulerKind::PathMapToPath`].
    pub stream_path_map: Vec<(StreamId, IpAddr)>,

    /// Per-stream priorities for [`StreamSchedulerKind::Priority`]. Lower values win; unlisted
    /// streams have priority 0.
    pub stream_priorities: Vec<(StreamId, u16)>,

    /// Negotiate and use partial reliability (RFC 3758).
    pub enable_partial_reliability: bool,

    /// Make a failed primary path primary again once it has recovered.
    pub reactivate_primary_path: bool,

    /// Deliver messages as [`Indication::Data`] as soon as they are complete. If unset, an
    /// [`Indication::DataNotification`] is emitted and the application pulls the message with
    /// [`AppCommand::Receive`].
    pub deliver_immediately: bool,

    /// If set, an idle path's congestion window decays back to the initial window after this long
    /// without sending.
    pub cwnd_decay_interval: Option<Duration>,

    /// Hex-dump every sent and received packet to the log.
    pub log_packets: bool,

    /// Accept packets without verifying the CRC32c checksum.
    pub disable_checksum_verification: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mtu: 1500,
            local_rwnd: 65536,
            sws_limit: 3000,
            send_queue_limit: 0,
            inbound_streams: 17,
            outbound_streams: 17,
            rto_initial: Duration::from_secs(3),
            rto_min: Duration::from_secs(1),
            rto_max: Duration::from_secs(60),
            init_rto: Duration::from_secs(3),
            init_rto_max: Duration::from_secs(240),
            max_init_retransmits: 8,
            assoc_max_retrans: 10,
            path_max_retrans: 5,
            valid_cookie_lifetime: Duration::from_secs(10),
            hb_interval: Duration::from_secs(30),
            sack_delay: Duration::from_millis(200),
            sack_frequency: 2,
            num_gap_reports: 3,
            nagle_enabled: true,
            max_burst: 4,
            shutdown_guard_timeout: Duration::from_secs(180),
            stream_scheduler: StreamSchedulerKind::RoundRobin,
            congestion_control: CongestionControlKind::Rfc4960,
            stream_path_map: Vec::new(),
            stream_priorities: Vec::new(),
            enable_partial_reliability: true,
            reactivate_primary_path: false,
            deliver_immediately: true,
            cwnd_decay_interval: None,
            log_packets: false,
            disable_checksum_verification: false,
        }
    }
}

/// The address used as source when no local address has been configured.
pub(crate) const UNSPECIFIED_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_arithmetic_saturates() {
        let t = SctpTime::from_millis(100);
        assert_eq!(t + Duration::from_millis(50), SctpTime::from_millis(150));
        assert_eq!(t - Duration::from_millis(500), SctpTime::zero());
        assert_eq!(SctpTime::from_millis(150) - t, Duration::from_millis(50));
        assert_eq!(t - SctpTime::from_millis(150), Duration::ZERO);
    }

    #[test]
    fn handles_display_as_gate_and_id() {
        assert_eq!(AppHandle::new(2, 17).to_string(), "2/17");
    }

    #[test]
    fn default_options_follow_rfc4960() {
        let options = Options::default();
        assert_eq!(options.rto_initial, Duration::from_secs(3));
        assert_eq!(options.rto_min, Duration::from_secs(1));
        assert_eq!(options.rto_max, Duration::from_secs(60));
        assert_eq!(options.assoc_max_retrans, 10);
        assert_eq!(options.path_max_retrans, 5);
        assert_eq!(options.valid_cookie_lifetime, Duration::from_secs(10));
        assert_eq!(options.hb_interval, Duration::from_secs(30));
    }

    #[test]
    fn command_errors_have_readable_messages() {
        assert_eq!(
            SctpError::UnknownAssociation(AppHandle::new(1, 2)).to_string(),
            "No association with handle 1/2"
        );
        assert_eq!(
            SctpError::InvalidStream(StreamId(20)).to_string(),
            "Stream 20 is not a negotiated outbound stream"
        );
    }
}
