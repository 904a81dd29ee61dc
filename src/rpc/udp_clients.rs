
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::debug;

use crate::error::BusError;
use crate::xdr;
use super::{xdr_pack, xdr_unpack};

// Broadcasts a single RPC call on the local network and collects every answer
pub struct BroadcastUdpClient {
	pub socket: UdpSocket,
	pub prog: u32,
	pub vers: u32,
	pub port: u16,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
	recv_buff: [u8; 8192],
}

impl BroadcastUdpClient {

	pub fn bind(port:u16, prog:u32, vers:u32, wait:Duration) -> Result<Self, BusError> {
		let socket:UdpSocket = UdpSocket::bind("0.0.0.0:0")?;
		socket.set_read_timeout(Some(wait))?;
		socket.set_broadcast(true)?;

		Ok(Self{ socket, prog, vers, port, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new(), recv_buff: [0; 8192] })
	}

	pub fn start_call(&mut self, prc:u32) -> Result<(), BusError> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	// Arguments must have been packed before this is called. Returns the reply bodies that carry
	// the right xid, keyed by sender, once the read timeout passes without a new datagram.
	pub fn make_call(&mut self) -> Result<Vec<(SocketAddr, Vec<u8>)>, BusError> {
		let call = self.packer.as_bytes();
		let n = self.socket.send_to(call, ("255.255.255.255", self.port))?;
		if n != call.len() {
			return Err(BusError::Protocol("Sent the wrong number of bytes".to_owned()));
		}

		let mut replies = vec![];
		loop {
			let (n, addr) = match self.socket.recv_from(&mut self.recv_buff) {
				Ok(received) => received,
				Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => break,
				Err(e) => return Err(e.into()),
			};

			self.unpacker.reset(&self.recv_buff[..n]);
			match xdr_unpack::unpack_replyheader(&mut self.unpacker) {
				Ok((xid, _)) if xid == self.lastxid => replies.push((addr, self.unpacker.remaining().to_vec())),
				Ok((xid, _)) => debug!("Ignoring broadcast reply from {} with xid {}", addr, xid),
				Err(e) => debug!("Ignoring malformed broadcast reply from {}: {}", addr, e),
			}
		}

		Ok(replies)
	}

}
