
pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::BusError;

use super::{IPPROTO_TCP, IPPROTO_UDP};
use super::xdr_pack;
use super::tcp_clients::TcpClient;
use super::udp_clients::BroadcastUdpClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
	TCP,
	UDP,
}

impl Protocol {
	pub fn to_u32(&self) -> u32 { match self {
		Protocol::TCP => IPPROTO_TCP,
		Protocol::UDP => IPPROTO_UDP,
	}}
}

#[derive(Debug, Clone)]
pub struct Mapping {
	pub program: u32,
	pub version: u32,
	pub protocol: Protocol,
	pub port: u32,				// XDR carries it as a u32
}

pub struct TcpPortMapperClient {
	pub host: String,
	pub tcp_client: TcpClient,
}

impl TcpPortMapperClient {

	pub fn new(host:&str) -> Result<Self, BusError> {
		let tcp_client = TcpClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS)?;
		Ok(Self{ host: host.to_owned(), tcp_client })
	}

	pub fn get_port(&mut self, m:&Mapping) -> Result<u16, BusError> {
		self.tcp_client.start_call(PMAPPROC_GETPORT)?;
		xdr_pack::pack_mapping(&mut self.tcp_client.packer, m.program, m.version, m.protocol.to_u32(), m.port)?;
		self.tcp_client.do_call()?;

		let ans:u32 = self.tcp_client.unpacker.unpack_u32()?;
		if !self.tcp_client.unpacker.all_data_consumed() {
			return Err(BusError::Protocol("Data unexpectedly left over after unpacking port".to_owned()));
		}

		match u16::try_from(ans) {
			Ok(0) => Err(BusError::Protocol(format!("Program {} is not registered on {}", m.program, self.host))),
			Ok(port) => Ok(port),
			Err(_) => Err(BusError::Protocol(format!("Port {} out of range", ans))),
		}
	}

}

// Ask every portmapper on the local network where it serves the given mapping.
// Hosts that answer with port 0 do not run the program and are left out.
pub fn broadcast_get_port(m:&Mapping, wait:Duration) -> Result<Vec<(IpAddr, u16)>, BusError> {
	let mut client = BroadcastUdpClient::bind(PMAP_PORT, PMAP_PROG, PMAP_VERS, wait)?;
	client.start_call(PMAPPROC_GETPORT)?;
	xdr_pack::pack_mapping(&mut client.packer, m.program, m.version, m.protocol.to_u32(), m.port)?;

	let mut hosts:Vec<(IpAddr, u16)> = vec![];
	for (addr, body) in client.make_call()? {
		let SocketAddr::V4(v4) = addr else { continue };
		if body.len() < 4 { continue; }
		let port = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
		if let Ok(port) = u16::try_from(port) {
			if port != 0 && !hosts.iter().any(|(ip, _)| *ip == IpAddr::V4(*v4.ip())) {
				hosts.push((IpAddr::V4(*v4.ip()), port));
			}
		}
	}

	Ok(hosts)
}
