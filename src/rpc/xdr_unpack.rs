
use crate::error::BusError;
use crate::xdr::Unpacker;
use crate::rpc::{CALL, REPLY, RPCVERSION, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

fn err(msg:&str) -> BusError { BusError::Protocol(msg.to_owned()) }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
	pub flavor: i32,
	pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHeader {
	pub xid: u32,
	pub prog: u32,
	pub vers: u32,
	pub prc: u32,
}

pub fn unpack_auth(unpacker:&mut Unpacker) -> Result<Auth, BusError> {
	let flavor:i32   = unpacker.unpack_enum()?;
	let body:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok(Auth{ flavor, body })
}

pub fn unpack_replyheader(unpacker:&mut Unpacker) -> Result<(u32, Auth), BusError> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != REPLY { return Err(err("Expected REPLY message type")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			return match unpacker.unpack_enum()? {
				RPC_MISMATCH => {
					let low  = unpacker.unpack_u32()?;
					let high = unpacker.unpack_u32()?;
					Err(BusError::Protocol(format!("Message denied, RPC version mismatch (server supports {}..{})", low, high)))
				},
				AUTH_ERROR => {
					let stat = unpacker.unpack_u32()?;
					Err(BusError::Protocol(format!("Message denied, authentication error {}", stat)))
				},
				_ => Err(err("Message denied for an unknown reason")),
			};
		},
		MSG_ACCEPTED => { },
		_ => return Err(err("Neither MSG_DENIED nor MSG_ACCEPTED in reply")),
	}

	let verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS => { },
		PROG_UNAVAIL => return Err(err("Program unavailable")),
		PROG_MISMATCH => {
			let low  = unpacker.unpack_u32()?;
			let high = unpacker.unpack_u32()?;
			return Err(BusError::Protocol(format!("Program version mismatch (server supports {}..{})", low, high)));
		},
		PROC_UNAVAIL => return Err(err("Procedure unavailable")),
		GARBAGE_ARGS => return Err(err("Server could not decode the arguments")),
		_ => return Err(err("Call failed for an unknown reason")),
	}

	Ok((xid, verf))
}

// Server side counterpart of pack_callheader, used by the fake instruments in the tests
pub fn unpack_callheader(unpacker:&mut Unpacker) -> Result<(CallHeader, Auth, Auth), BusError> {
	let xid:u32 = unpacker.unpack_u32()?;
	if unpacker.unpack_enum()? != CALL { return Err(err("Expected CALL message type")); }
	if unpacker.unpack_u32()? != RPCVERSION { return Err(err("Unsupported RPC version")); }

	let prog = unpacker.unpack_u32()?;
	let vers = unpacker.unpack_u32()?;
	let prc  = unpacker.unpack_u32()?;
	let cred = unpack_auth(unpacker)?;
	let verf = unpack_auth(unpacker)?;

	Ok((CallHeader{ xid, prog, vers, prc }, cred, verf))
}
