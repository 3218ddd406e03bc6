//! Type aliases for RDMA identifiers.

/// [`u8`]: **Port number**, identifies a port on an HCA. Port numbers start from 1.
pub type PortNum = u8;

/// [`u16`]: **Local identifier (LID)**, identifies a port on a switch or an HCA in the cluster.
pub type Lid = u16;

/// [`u8`]: **Global identifier (GID) index**, identifies a GID on a physical port.
pub type GidIndex = u8;

/// [`u32`]: **Queue pair number**, identifies a queue pair on the fabric.
pub type Qpn = u32;

/// [`u32`]: **Packet sequence number (PSN)**, identifies a packet in a flow.
pub type Psn = u32;

/// [`u32`]: **Queue key**, carried in queue pair attributes.
pub type QKey = u32;

/// [`u16`]: **Partition key index**.
pub type PKeyIndex = u16;

/// [`u32`]: **Local key**, identifies a local memory registration.
pub type LKey = u32;

/// [`u32`]: **Remote key**, identifies a memory registration to remote peers.
pub type RKey = u32;

/// [`u64`]: **Work request identifier**, designated by the user to identify a work request.
pub type WrId = u64;

/// [`u32`]: **Immediate data**, can be carried in send-type work requests.
pub type ImmData = u32;
