//! Crate-wide error type.

use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "TOML parse error: {}", _0)]
	Toml(#[error(source)] toml::de::Error),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn message<S: Into<String>>(s: S) -> Self {
		Error::Message(s.into())
	}
}

pub trait OkOrMessage<T> {
	fn ok_or_message<S: Into<String>>(self, s: S) -> Result<T, Error>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<S: Into<String>>(self, s: S) -> Result<T, Error> {
		self.ok_or_else(|| Error::message(s.into()))
	}
}
