
use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::BusError;

fn err(msg:&str) -> BusError { BusError::Protocol(msg.to_owned()) }

#[derive(Debug, Default)]
pub struct Packer {
	buff: Vec<u8>
}

#[derive(Debug, Default)]
pub struct Unpacker {
	buff: Vec<u8>,
	pos: usize,
}

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	// Every item below adds a multiple of four bytes, so alignment is preserved as long as we start aligned
	pub fn pack_u32(&mut self, x:u32) -> Result<(), BusError> { Ok(self.buff.write_u32::<BigEndian>(x)?) }
	pub fn pack_i32(&mut self, x:i32) -> Result<(), BusError> { Ok(self.buff.write_i32::<BigEndian>(x)?) }

	pub fn pack_bool(&mut self, b:bool) -> Result<(), BusError> {
		if b { self.pack_i32(1) }
		else { self.pack_i32(0) }
	}

	pub fn pack_enum(&mut self, x:i32) -> Result<(), BusError> { self.pack_i32(x) }

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> Result<(), BusError> {
		let len = u32::try_from(data.len()).map_err(|_| err("Opaque data longer than u32::MAX"))?;
		self.pack_u32(len)?;
		self.buff.extend_from_slice(data);

		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn all_data_consumed(&self) -> bool { self.pos >= self.buff.len() }

	pub fn remaining(&self) -> &[u8] { &self.buff[self.pos..] }

	fn take(&mut self, n:usize) -> Result<&[u8], BusError> {
		let start = self.pos;
		let end = start.checked_add(n)
			.filter(|end| *end <= self.buff.len())
			.ok_or_else(|| err("Tried to read past the end of the buffer"))?;
		self.pos = end;
		Ok(&self.buff[start..end])
	}

	pub fn unpack_u32(&mut self) -> Result<u32, BusError> {
		let mut rdr = Cursor::new(self.take(4)?);
		Ok(rdr.read_u32::<BigEndian>()?)
	}

	pub fn unpack_i32(&mut self) -> Result<i32, BusError> {
		let mut rdr = Cursor::new(self.take(4)?);
		Ok(rdr.read_i32::<BigEndian>()?)
	}

	// Whether the value belongs to the enum depends on the caller, so here an enum is just an i32
	pub fn unpack_enum(&mut self) -> Result<i32, BusError> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> Result<bool, BusError> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(BusError::Protocol(format!("Expected 0 or 1 for a bool but got {}", x))),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> Result<Vec<u8>, BusError> {
		let n = self.unpack_u32()? as usize;
		let ans:Vec<u8> = self.take(n)?.to_vec();

		// Skip the padding that keeps the next item aligned
		let pad = (4 - n % 4) % 4;
		self.take(pad)?;
		Ok(ans)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opaque_is_padded_to_four_bytes() {
		let mut packer = Packer::new();
		packer.pack_variable_len_opaque(b"*IDN?").unwrap();
		assert_eq!(packer.as_bytes(), &[0, 0, 0, 5, b'*', b'I', b'D', b'N', b'?', 0, 0, 0]);

		let mut unpacker = Unpacker::new();
		unpacker.reset(packer.as_bytes());
		assert_eq!(unpacker.unpack_variable_len_opaque().unwrap(), b"*IDN?".to_vec());
		assert!(unpacker.all_data_consumed());
	}

	#[test]
	fn mixed_items_decode_in_order() {
		let mut packer = Packer::new();
		packer.pack_u32(0x0607af).unwrap();
		packer.pack_i32(-3).unwrap();
		packer.pack_bool(true).unwrap();
		packer.pack_variable_len_opaque(b"inst0").unwrap();
		packer.pack_enum(2).unwrap();

		let mut unpacker = Unpacker::new();
		unpacker.reset(packer.as_bytes());
		assert_eq!(unpacker.unpack_u32().unwrap(), 0x0607af);
		assert_eq!(unpacker.unpack_i32().unwrap(), -3);
		assert!(unpacker.unpack_bool().unwrap());
		assert_eq!(unpacker.unpack_variable_len_opaque().unwrap(), b"inst0".to_vec());
		assert_eq!(unpacker.unpack_enum().unwrap(), 2);
		assert!(unpacker.all_data_consumed());
	}

	#[test]
	fn bool_outside_zero_one_is_an_error() {
		let mut unpacker = Unpacker::new();
		unpacker.reset(&[0, 0, 0, 7]);
		assert!(matches!(unpacker.unpack_bool(), Err(BusError::Protocol(_))));
	}

	#[test]
	fn reading_past_the_end_is_an_error() {
		let mut unpacker = Unpacker::new();
		unpacker.reset(&[0, 0, 0, 9, 1, 2]);
		assert!(unpacker.unpack_variable_len_opaque().is_err());

		unpacker.reset(&[0, 1]);
		assert!(unpacker.unpack_u32().is_err());
	}
}
