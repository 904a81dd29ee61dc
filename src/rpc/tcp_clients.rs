
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};
use log::trace;

use crate::error::BusError;
use crate::xdr;
use super::{xdr_pack, xdr_unpack, LAST_FRAGMENT, MAX_RECORD_SIZE};

// Send a whole call as a single record-marked fragment
pub fn write_record<W: Write>(stream:&mut W, call:&[u8]) -> Result<(), BusError> {
	let len = u32::try_from(call.len())
		.ok().filter(|n| *n < LAST_FRAGMENT)
		.ok_or_else(|| BusError::Protocol("Call too large for a single fragment".to_owned()))?;

	let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
	send_bytes.write_u32::<BigEndian>(len | LAST_FRAGMENT)?;
	send_bytes.extend_from_slice(call);
	stream.write_all(&send_bytes)?;
	stream.flush()?;
	Ok(())
}

// Read fragments until the one flagged as last, returning the reassembled record
pub fn read_record<R: Read>(stream:&mut R) -> Result<Vec<u8>, BusError> {
	let mut record:Vec<u8> = vec![];

	let mut last:bool = false;
	while !last {
		let x:u32 = stream.read_u32::<BigEndian>()?;
		last = (x & LAST_FRAGMENT) != 0;
		let n = (x & !LAST_FRAGMENT) as usize;

		let start = record.len();
		if start + n > MAX_RECORD_SIZE {
			return Err(BusError::Protocol(format!("Record of {} bytes exceeds the {} byte limit", start + n, MAX_RECORD_SIZE)));
		}
		record.resize(start + n, 0);
		stream.read_exact(&mut record[start..])?;
	}

	Ok(record)
}

pub struct TcpClient {
	pub stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr:A, prog:u32, vers:u32) -> Result<Self, BusError> {
		let stream = TcpStream::connect(addr)?;
		stream.set_nodelay(true)?;
		Ok(Self{ stream, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new() })
	}

	// None blocks forever
	pub fn set_timeout(&self, timeout:Option<Duration>) -> Result<(), BusError> {
		self.stream.set_read_timeout(timeout)?;
		self.stream.set_write_timeout(timeout)?;
		Ok(())
	}

	// Start a new call; procedure arguments are packed into self.packer afterwards
	pub fn start_call(&mut self, prc:u32) -> Result<(), BusError> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	// Send the packed call and leave the reply body in self.unpacker
	pub fn do_call(&mut self) -> Result<(), BusError> {
		write_record(&mut self.stream, self.packer.as_bytes())?;

		loop {
			let reply = read_record(&mut self.stream)?;
			self.unpacker.reset(&reply);

			let (xid, _) = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to an earlier call
				trace!("Discarding stale RPC reply xid={} (expecting {})", xid, self.lastxid);
				continue;
			} else {
				return Err(BusError::Protocol("Somehow got a reply from the future".to_owned()));
			}
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn record_round_trip() {
		let mut wire:Vec<u8> = vec![];
		write_record(&mut wire, &[1, 2, 3, 4]).unwrap();
		assert_eq!(wire, vec![0x80, 0, 0, 4, 1, 2, 3, 4]);

		let record = read_record(&mut Cursor::new(wire)).unwrap();
		assert_eq!(record, vec![1, 2, 3, 4]);
	}

	#[test]
	fn multi_fragment_record_is_reassembled() {
		let wire:Vec<u8> = vec![
			0, 0, 0, 4, 1, 2, 3, 4,
			0x80, 0, 0, 4, 5, 6, 7, 8,
		];
		let record = read_record(&mut Cursor::new(wire)).unwrap();
		assert_eq!(record, vec![1, 2, 3, 4, 5, 6, 7, 8]);
	}

	#[test]
	fn oversized_fragment_is_refused() {
		let wire:Vec<u8> = vec![0xff, 0xff, 0xff, 0xff, 1, 2, 3];
		assert!(matches!(read_record(&mut Cursor::new(wire)), Err(BusError::Protocol(_))));
	}

	#[test]
	fn oversized_record_across_fragments_is_refused() {
		let half = (MAX_RECORD_SIZE / 2 + 1) as u32;
		let mut wire:Vec<u8> = half.to_be_bytes().to_vec();
		wire.extend(vec![0u8; half as usize]);
		wire.extend((half | LAST_FRAGMENT).to_be_bytes());
		assert!(matches!(read_record(&mut Cursor::new(wire)), Err(BusError::Protocol(_))));
	}

	#[test]
	fn truncated_record_is_an_error() {
		let wire:Vec<u8> = vec![0x80, 0, 0, 8, 1, 2];
		assert!(matches!(read_record(&mut Cursor::new(wire)), Err(BusError::Io(_))));
	}
}
