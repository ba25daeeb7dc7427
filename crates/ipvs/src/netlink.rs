//! Netlink communication layer for IPVS.
//!
//! This module provides low-level netlink socket operations for communicating
//! with the kernel IPVS module via generic netlink: request/ack exchanges,
//! attribute dumps and the family-id resolution performed on open.

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkDeserializable, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable,
};
use netlink_packet_generic::{
    GenlMessage,
    ctrl::{GenlCtrl, GenlCtrlCmd, nlas::GenlCtrlAttrs},
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_GENERIC};
use nix::sys::socket::{setsockopt, sockopt};
use nix::sys::time::TimeVal;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;
use tracing::{debug, trace};

use crate::commands::IPVSCommand;
use crate::messages::{IPVSMessage, IPVSNla};

/// IPVS generic netlink family name
const IPVS_GENL_NAME: &str = "IPVS";

/// Receive buffer size; dumps can batch many services per datagram.
const RECV_BUF_SIZE: usize = 64 * 1024;

/// Netlink socket wrapper for IPVS operations.
pub struct NetlinkSocket {
    socket: Socket,
    family_id: u16,
    sequence: u32,
    debug: bool,
}

impl NetlinkSocket {
    /// Create a new netlink socket and resolve the IPVS family ID.
    ///
    /// `ack_timeout` bounds every wait for a kernel reply; an expired wait
    /// surfaces as [`Error::Timeout`].
    pub fn new(ack_timeout: Duration) -> Result<Self> {
        debug!("Creating netlink socket for IPVS");

        let mut socket = Socket::new(NETLINK_GENERIC)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;

        let addr = SocketAddr::new(0, 0);
        socket
            .bind(&addr)
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;

        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        set_recv_timeout(&socket, ack_timeout)?;

        let mut nl_socket = Self {
            socket,
            family_id: 0,
            sequence: 0,
            debug: false,
        };

        // Resolve IPVS family ID
        nl_socket.family_id = nl_socket.resolve_family_id(IPVS_GENL_NAME)?;
        debug!("IPVS family ID: {}", nl_socket.family_id);

        Ok(nl_socket)
    }

    /// Get the IPVS family ID.
    pub fn family_id(&self) -> u16 {
        self.family_id
    }

    /// Enable or disable raw-frame tracing.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Get the next sequence number.
    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Resolve a generic netlink family name to its ID.
    fn resolve_family_id(&mut self, family_name: &str) -> Result<u16> {
        debug!("Resolving generic netlink family: {}", family_name);

        // Create CTRL_CMD_GETFAMILY message
        let mut genlmsg: GenlMessage<GenlCtrl> = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::GetFamily,
            nlas: vec![GenlCtrlAttrs::FamilyName(family_name.to_string())],
        });

        genlmsg.set_resolved_family_id(libc::GENL_ID_CTRL as u16);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;

        let buf = self.recv_bytes()?;
        let response: NetlinkMessage<GenlMessage<GenlCtrl>> = deserialize_one(&buf)?;

        match response.payload {
            NetlinkPayload::InnerMessage(genlmsg) => {
                for nla in &genlmsg.payload.nlas {
                    if let GenlCtrlAttrs::FamilyId(id) = nla {
                        trace!("Found family ID {} for {}", id, family_name);
                        return Ok(*id);
                    }
                }
                Err(Error::netlink(format!(
                    "Family ID not found in response for {}",
                    family_name
                )))
            }
            NetlinkPayload::Error(err) => Err(Error::netlink(format!(
                "Netlink error while resolving family: {:?}",
                err.code
            ))),
            _ => Err(Error::netlink("Unexpected netlink response type")),
        }
    }

    /// Send a netlink message.
    fn send_message<T>(&mut self, message: &NetlinkMessage<T>) -> Result<()>
    where
        T: NetlinkSerializable + std::fmt::Debug,
    {
        let mut buf = BytesMut::with_capacity(message.buffer_len());
        message.serialize(&mut buf);

        trace!("Sending netlink message: {:?}", message);
        if self.debug {
            debug!(frame = format!("{:02x?}", &buf[..]), "netlink send");
        }

        self.socket.send(&buf[..], 0).map_err(map_io_error)?;

        Ok(())
    }

    /// Receive one datagram from the kernel.
    fn recv_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        let len = self.socket.recv(&mut buf, 0).map_err(map_io_error)?;
        buf.truncate(len);

        if self.debug {
            debug!(frame = format!("{:02x?}", &buf[..]), "netlink recv");
        }

        Ok(buf)
    }

    /// Build and send an IPVS request with the given header flags.
    fn send_ipvs_request(&mut self, cmd: IPVSCommand, nlas: Vec<IPVSNla>, flags: u16) -> Result<()> {
        let mut genlmsg: GenlMessage<IPVSMessage> =
            GenlMessage::from_payload(IPVSMessage::with_nlas(cmd, nlas));
        genlmsg.set_resolved_family_id(self.family_id);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = flags;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)
    }

    /// Issue a mutating IPVS command and wait for the kernel acknowledgment.
    pub fn ack_request(&mut self, cmd: IPVSCommand, nlas: Vec<IPVSNla>) -> Result<()> {
        self.send_ipvs_request(cmd, nlas, NLM_F_REQUEST | NLM_F_ACK)?;

        let buf = self.recv_bytes()?;
        let response: NetlinkMessage<GenlMessage<IPVSMessage>> = deserialize_one(&buf)?;

        match response.payload {
            NetlinkPayload::Error(err) => match err.code {
                None => Ok(()),
                Some(code) => Err(Error::kernel_reject(code.get().unsigned_abs() as i32)),
            },
            // Some commands answer with data before the ack; treat the
            // reply itself as success.
            NetlinkPayload::InnerMessage(_) => Ok(()),
            _ => Err(Error::netlink("Unexpected netlink response type")),
        }
    }

    /// Issue a query expecting a single reply message.
    pub fn query(&mut self, cmd: IPVSCommand, nlas: Vec<IPVSNla>) -> Result<IPVSMessage> {
        self.send_ipvs_request(cmd, nlas, NLM_F_REQUEST)?;

        let buf = self.recv_bytes()?;
        let response: NetlinkMessage<GenlMessage<IPVSMessage>> = deserialize_one(&buf)?;

        match response.payload {
            NetlinkPayload::InnerMessage(genlmsg) => Ok(genlmsg.payload),
            NetlinkPayload::Error(err) => match err.code {
                None => Err(Error::netlink("query answered by bare ack")),
                Some(code) => Err(Error::kernel_reject(code.get().unsigned_abs() as i32)),
            },
            _ => Err(Error::netlink("Unexpected netlink response type")),
        }
    }

    /// Issue a dump request and collect every reply message until the
    /// kernel's DONE marker.
    pub fn dump_request(&mut self, cmd: IPVSCommand, nlas: Vec<IPVSNla>) -> Result<Vec<IPVSMessage>> {
        self.send_ipvs_request(cmd, nlas, NLM_F_REQUEST | NLM_F_DUMP)?;

        let mut messages = Vec::new();
        loop {
            let buf = self.recv_bytes()?;
            let mut offset = 0;

            while offset < buf.len() {
                let response: NetlinkMessage<GenlMessage<IPVSMessage>> =
                    deserialize_one(&buf[offset..])?;
                let consumed = response.header.length as usize;
                if consumed == 0 {
                    return Err(Error::decode("zero-length netlink message in dump"));
                }

                match response.payload {
                    NetlinkPayload::Done(_) => return Ok(messages),
                    NetlinkPayload::InnerMessage(genlmsg) => messages.push(genlmsg.payload),
                    NetlinkPayload::Error(err) => {
                        return Err(Error::DumpInterrupted(format!(
                            "kernel error after {} messages: {:?}",
                            messages.len(),
                            err.code
                        )));
                    }
                    NetlinkPayload::Overrun(_) => {
                        return Err(Error::DumpInterrupted(
                            "receive buffer overrun".to_string(),
                        ));
                    }
                    _ => {
                        return Err(Error::DumpInterrupted(
                            "unexpected message in dump".to_string(),
                        ));
                    }
                }

                // Netlink messages are 4-byte aligned within a datagram.
                offset += (consumed + 3) & !3;
            }
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // Socket will be closed automatically
        trace!("Closing netlink socket");
    }
}

fn deserialize_one<T>(bytes: &[u8]) -> Result<NetlinkMessage<T>>
where
    T: NetlinkDeserializable + std::fmt::Debug,
{
    let message = NetlinkMessage::<T>::deserialize(bytes)
        .map_err(|e| Error::decode(format!("Failed to parse netlink message: {}", e)))?;

    trace!("Received netlink message: {:?}", message);

    Ok(message)
}

fn map_io_error(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(err),
    }
}

fn set_recv_timeout(socket: &Socket, timeout: Duration) -> Result<()> {
    let tv = TimeVal::new(
        timeout.as_secs() as libc::time_t,
        timeout.subsec_micros() as libc::suseconds_t,
    );
    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    setsockopt(&fd, sockopt::ReceiveTimeout, &tv)
        .map_err(|e| Error::netlink(format!("Failed to set receive timeout: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netlink_socket_creation() {
        // This test requires root privileges and IPVS kernel module
        // Skip in CI unless explicitly enabled
        if std::env::var("IPVS_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_netlink_socket_creation (requires IPVS_TEST_ENABLED=1)");
            return;
        }

        let result = NetlinkSocket::new(Duration::from_secs(2));
        match result {
            Ok(socket) => {
                assert!(socket.family_id() > 0);
                println!("IPVS family ID: {}", socket.family_id());
            }
            Err(e) => {
                panic!("Failed to create netlink socket: {}", e);
            }
        }
    }

    #[test]
    fn test_io_error_mapping() {
        let timeout = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(matches!(map_io_error(timeout), Error::Timeout));

        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(map_io_error(broken), Error::Io(_)));
    }
}
