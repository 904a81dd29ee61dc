// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_IO_TIMEOUT_MS:u32   = 10000;
pub const DEFAULT_LOCK_TIMEOUT_MS:u32 = 10000;
// Extra time the socket waits beyond the device I/O timeout
pub const SOCKET_TIMEOUT_MARGIN:Duration = Duration::from_secs(1);

pub const OPERATION_FLAGS_END:i32 = 8;

// Reason bits of a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

const READ_REQUEST_SIZE:u32 = 1 << 20;

use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use log::{debug, trace};

use crate::error::BusError;
use crate::rpc::port_mapping::{self, TcpPortMapperClient, Mapping, Protocol};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

fn device_error(code:i32) -> BusError {
    let message = match code {
        1  => "Syntax error",
        3  => "Device not accessible",
        4  => "Invalid link identifier",
        5  => "Parameter error",
        6  => "Channel not established",
        8  => "Operation not supported",
        9  => "Out of resources",
        11 => "Device locked by another link",
        12 => "No lock held by this link",
        15 => "I/O timeout",
        17 => "I/O error",
        21 => "Invalid address",
        23 => "Abort",
        29 => "Channel already established",
        _  => "Unknown error",
    };
    BusError::Device{ code, message }
}

fn check(code:i32) -> Result<(), BusError> {
    if code == 0 { Ok(()) } else { Err(device_error(code)) }
}

fn core_mapping() -> Mapping {
    Mapping {
        program: DEVICE_CORE_PROG,
        version: DEVICE_CORE_VERS,
        protocol: Protocol::TCP,
        port: 0,
    }
}

pub struct CoreClient {
    client: TcpClient,
    opt_link: Option<Link>,
    io_timeout_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u32,
    pub max_recv_size: u32,
}

impl CoreClient {

    fn get_link(&self) -> Result<Link, BusError> {
        self.opt_link.ok_or_else(|| BusError::Protocol("No link".to_owned()))
    }

    // Ask the host's portmapper where the core program lives, then connect to it
    pub fn new(host:&str) -> Result<Self, BusError> {
        let mut pmap_client = TcpPortMapperClient::new(host)?;
        let port = pmap_client.get_port(&core_mapping())?;
        debug!("VXI-11 core channel of {} is on port {}", host, port);

        Self::connect((host, port))
    }

    // Connect straight to a known core channel address
    pub fn connect<A: ToSocketAddrs>(addr:A) -> Result<Self, BusError> {
        let client = TcpClient::connect(addr, DEVICE_CORE_PROG, DEVICE_CORE_VERS)?;
        Ok(CoreClient{ client, opt_link: None, io_timeout_ms: DEFAULT_IO_TIMEOUT_MS })
    }

    // Device side I/O timeout, also bounding how long the socket waits for a reply
    pub fn with_io_timeout(mut self, timeout:Duration) -> Result<Self, BusError> {
        self.io_timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.client.set_timeout(Some(timeout.saturating_add(SOCKET_TIMEOUT_MARGIN)))?;
        Ok(self)
    }

    pub fn link(&self) -> Option<Link> { self.opt_link }

    pub fn create_link(&mut self, device:&str) -> Result<(), BusError> {
        if self.opt_link.is_some() {
            return Err(BusError::Protocol("Already connected to a link".to_owned()));
        }

        self.client.start_call(CREATE_LINK)?;
        xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT_MS, device)?;
        self.client.do_call()?;

        let error:i32         = self.client.unpacker.unpack_i32()?;
        let link_id:i32       = self.client.unpacker.unpack_i32()?;
        let abort_port:u32    = self.client.unpacker.unpack_u32()?;
        let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;
        check(error)?;

        debug!("Created VXI-11 link {} to {} (max_recv_size={})", link_id, device, max_recv_size);
        self.opt_link = Some(Link{ link_id, abort_port, max_recv_size });
        Ok(())
    }

    pub fn ask(&mut self, data:&[u8]) -> Result<Vec<u8>, BusError> {
        self.write(data)?;
        self.read()
    }

    // Messages longer than the device's receive size go out in several calls, END set on the last
    pub fn write(&mut self, data:&[u8]) -> Result<(), BusError> {
        let link = self.get_link()?;
        let chunk_size = match link.max_recv_size { 0 => data.len().max(1), n => n as usize };

        let mut chunks = data.chunks(chunk_size).peekable();
        if chunks.peek().is_none() {
            return self.write_chunk(link.link_id, &[], true);
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.write_chunk(link.link_id, chunk, last)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, link_id:i32, chunk:&[u8], last:bool) -> Result<(), BusError> {
        let flags = if last { OPERATION_FLAGS_END } else { 0 };

        self.client.start_call(DEVICE_WRITE)?;
        xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS, flags, chunk)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        let size:u32  = self.client.unpacker.unpack_u32()?;
        check(error)?;

        if size as usize != chunk.len() {
            return Err(BusError::Protocol("Number of bytes in confirmation doesn't match number of bytes sent".to_owned()));
        }
        trace!("VXI-11 wrote {} bytes", size);
        Ok(())
    }

    // Keep reading until the device flags END or the termination character
    pub fn read(&mut self) -> Result<Vec<u8>, BusError> {
        let link = self.get_link()?;
        let mut data:Vec<u8> = vec![];

        loop {
            self.client.start_call(DEVICE_READ)?;
            xdr_pack::pack_device_read_parms(&mut self.client.packer, link.link_id, READ_REQUEST_SIZE, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS, 0, 0)?;
            self.client.do_call()?;

            let error:i32  = self.client.unpacker.unpack_i32()?;
            let reason:i32 = self.client.unpacker.unpack_i32()?;
            let chunk      = self.client.unpacker.unpack_variable_len_opaque()?;
            check(error)?;

            data.extend_from_slice(&chunk);
            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(data);
            }
            if reason & REASON_REQCNT == 0 {
                return Err(BusError::Protocol(format!("Unexpected reason bits {:#x} in read reply", reason)));
            }
        }
    }

    pub fn destroy_link(&mut self) -> Result<(), BusError> {
        let link = self.get_link()?;

        self.client.start_call(DESTROY_LINK)?;
        xdr_pack::pack_device_link(&mut self.client.packer, link.link_id)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        self.opt_link = None;
        check(error)
    }

}

// Find the hosts on the local network that serve the VXI-11 core program
pub fn discover(wait:Duration) -> Result<Vec<IpAddr>, BusError> {
    let hosts = port_mapping::broadcast_get_port(&core_mapping(), wait)?;
    debug!("VXI-11 discovery found {} host(s)", hosts.len());
    Ok(hosts.into_iter().map(|(ip, _)| ip).collect())
}
