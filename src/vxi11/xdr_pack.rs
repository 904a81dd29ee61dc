
use crate::error::BusError;
use crate::xdr::Packer;

pub fn pack_device_link(packer:&mut Packer, link:i32) -> Result<(), BusError> {
	packer.pack_i32(link)
}

pub fn pack_create_link_parms(packer:&mut Packer, id:i32, lock_device:bool, lock_timeout:u32, device:&str) -> Result<(), BusError> {
	if !device.is_ascii() {
		return Err(BusError::BadResource(device.to_owned()));
	}
	packer.pack_i32(id)?;
	packer.pack_bool(lock_device)?;
	packer.pack_u32(lock_timeout)?;
	packer.pack_variable_len_opaque(device.as_bytes())
}

pub fn pack_device_write_parms(packer:&mut Packer, link:i32, timeout:u32, lock_timeout:u32, flags:i32, data:&[u8]) -> Result<(), BusError> {
	packer.pack_i32(link)?;
	packer.pack_u32(timeout)?;
	packer.pack_u32(lock_timeout)?;
	packer.pack_i32(flags)?;
	packer.pack_variable_len_opaque(data)
}

pub fn pack_device_read_parms(packer:&mut Packer, link:i32, request_size:u32, timeout:u32, lock_timeout:u32, flags:i32, term_char:i32) -> Result<(), BusError> {
	packer.pack_i32(link)?;
	packer.pack_u32(request_size)?;
	packer.pack_u32(timeout)?;
	packer.pack_u32(lock_timeout)?;
	packer.pack_i32(flags)?;
	packer.pack_i32(term_char)
}

// Response packers for playing the instrument side in tests

pub fn pack_create_link_resp(packer:&mut Packer, error:i32, link:i32, abort_port:u32, max_recv_size:u32) -> Result<(), BusError> {
	packer.pack_i32(error)?;
	packer.pack_i32(link)?;
	packer.pack_u32(abort_port)?;
	packer.pack_u32(max_recv_size)
}

pub fn pack_device_write_resp(packer:&mut Packer, error:i32, size:u32) -> Result<(), BusError> {
	packer.pack_i32(error)?;
	packer.pack_u32(size)
}

pub fn pack_device_read_resp(packer:&mut Packer, error:i32, reason:i32, data:&[u8]) -> Result<(), BusError> {
	packer.pack_i32(error)?;
	packer.pack_i32(reason)?;
	packer.pack_variable_len_opaque(data)
}

pub fn pack_device_error(packer:&mut Packer, error:i32) -> Result<(), BusError> {
	packer.pack_i32(error)
}
