//! Error taxonomy for the block-server core (spec.md §7).

use err_derive::Error;

use crate::wire::ExternalThrowable;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "block store corrupt: {}", _0)]
	Corrupt(String),

	#[error(display = "data_id {} out of range [0, 16384)", _0)]
	OutOfRange(u32),

	#[error(display = "data_id {} not present", _0)]
	DataIdNotPresent(u32),

	#[error(display = "block {:?} not present", _0)]
	BlockNotPresent(crate::block_id::BlockId),

	#[error(display = "operation not supported on a compressed store")]
	NotSupported,

	#[error(display = "bad frame: expected write position {}, got {}", expected, got)]
	BadFrame { expected: u64, got: u64 },

	#[error(display = "out-of-order block part for {:?}", _0)]
	OutOfOrderPart(crate::block_id::BlockId),

	#[error(display = "service not connected: {}", _0)]
	ServiceNotConnected(String),

	#[error(display = "service is in a stop state: {}", _0)]
	StopState(String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn message<S: Into<String>>(s: S) -> Self {
		Error::Message(s.into())
	}

	/// Render this error the way it crosses the wire: as the
	/// (class name, message, stack trace) triple of an `ExternalThrowable`.
	pub fn to_external_throwable(&self) -> ExternalThrowable {
		let class_name = match self {
			Error::Io(_) => "IOError",
			Error::Corrupt(_) => "BlockReadError$Corrupt",
			Error::OutOfRange(_) => "BlockReadError$OutOfRange",
			Error::DataIdNotPresent(_) => "BlockReadError$DataIdNotPresent",
			Error::BlockNotPresent(_) => "BlockReadError$BlockNotPresent",
			Error::NotSupported => "NotSupportedError",
			Error::BadFrame { .. } => "BadFrameError",
			Error::OutOfOrderPart(_) => "OutOfOrderPartError",
			Error::ServiceNotConnected(_) => "ServiceNotConnectedError",
			Error::StopState(_) => "StopStateError",
			Error::Message(_) => "MckoiError",
		};
		ExternalThrowable {
			class_name: class_name.to_string(),
			message: self.to_string(),
			stack_trace: String::new(),
		}
	}
}

pub trait OkOrMessage<T> {
	fn ok_or_message<S: Into<String>>(self, s: S) -> Result<T>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<S: Into<String>>(self, s: S) -> Result<T> {
		self.ok_or_else(|| Error::message(s.into()))
	}
}
