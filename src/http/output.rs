//! One-shot encoder for a single HTTP response.
//!
//! Keep-alive connections require either a complete `Content-Length` up
//! front or a single complete body write; any call sequence that could
//! desynchronise the stream is refused with `BadSequenceOfCalls`.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use tracing::error;

use crate::error::ApiError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
	WritingHeader,
	WritingBody,
	Done,
}

/// Downstream sink of an [`HttpOutput`]. Implementations must fully drain
/// every buffer before returning; a partial write is not an option the
/// state machine can recover from.
pub trait HttpOutputStream {
	/// Called once with the final status code, before any byte is sent.
	fn on_status(&mut self, status: u16);

	/// Sends raw bytes. `is_header` is true for the status line and header
	/// block, false for body chunks.
	fn send(&mut self, is_header: bool, data: &[u8]) -> Result<(), ApiError>;
}

/// State machine encoding one HTTP response: status and headers first, then
/// the body, with the declared content length enforced.
pub struct HttpOutput<S: HttpOutputStream> {
	stream: S,
	state: State,
	status: u16,
	headers: Vec<(String, String)>,
	declared_length: Option<u64>,
	position: u64,
	keep_alive: bool,
}

impl<S: HttpOutputStream> HttpOutput<S> {
	pub fn new(stream: S, keep_alive: bool) -> Self {
		Self {
			stream,
			state: State::WritingHeader,
			status: 200,
			headers: Vec::new(),
			declared_length: None,
			position: 0,
			keep_alive,
		}
	}

	pub fn is_done(&self) -> bool {
		self.state == State::Done
	}

	fn check_writing_header(&self) -> Result<(), ApiError> {
		if self.state == State::WritingHeader {
			Ok(())
		} else {
			Err(ApiError::BadSequenceOfCalls(
				"the header of the HTTP answer was already sent",
			))
		}
	}

	pub fn set_status(&mut self, status: u16) -> Result<(), ApiError> {
		self.check_writing_header()?;
		self.status = status;
		Ok(())
	}

	pub fn set_content_length(&mut self, length: u64) -> Result<(), ApiError> {
		self.check_writing_header()?;
		self.declared_length = Some(length);
		Ok(())
	}

	pub fn add_header(&mut self, header: &str, value: &str) -> Result<(), ApiError> {
		self.check_writing_header()?;
		self.headers.push((header.to_owned(), value.to_owned()));
		Ok(())
	}

	pub fn clear_headers(&mut self) -> Result<(), ApiError> {
		self.check_writing_header()?;
		self.headers.clear();
		Ok(())
	}

	pub fn set_content_type(&mut self, content_type: &str) -> Result<(), ApiError> {
		self.add_header("Content-Type", content_type)
	}

	pub fn set_content_filename(&mut self, filename: &str) -> Result<(), ApiError> {
		// TODO: escape double quotes in the filename
		self.add_header("Content-Disposition", &format!("filename=\"{filename}\""))
	}

	pub fn set_cookie(&mut self, cookie: &str, value: &str) -> Result<(), ApiError> {
		self.check_writing_header()?;
		self.add_header("Set-Cookie", &format!("{cookie}={value}"))
	}

	/// Appends body bytes, flushing the status line and headers first if
	/// this is the first chunk. The computed `Content-Length` is the
	/// declared length when one was set and the status is 200, otherwise
	/// the size of this first chunk.
	pub fn send_body(&mut self, data: &[u8]) -> Result<(), ApiError> {
		if self.state == State::Done {
			if data.is_empty() {
				return Ok(());
			}
			return Err(ApiError::BadSequenceOfCalls(
				"on keep-alive connections, the entire body must be sent at \
				 once or Content-Length must be declared",
			));
		}

		if self.state == State::WritingHeader {
			self.stream.on_status(self.status);

			let mut header = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
			if self.keep_alive {
				header.push_str("Connection: keep-alive\r\n");
			}
			for (name, value) in &self.headers {
				header.push_str(name);
				header.push_str(": ");
				header.push_str(value);
				header.push_str("\r\n");
			}

			// Error bodies must not truncate: any status but 200 forces the
			// content length to the actual bytes written.
			if self.status != 200 {
				self.declared_length = None;
			}

			let content_length = self.declared_length.unwrap_or(data.len() as u64);
			header.push_str(&format!("Content-Length: {content_length}\r\n\r\n"));

			self.stream.send(true, header.as_bytes())?;
			self.state = State::WritingBody;
		}

		if let Some(declared) = self.declared_length {
			if self.position + data.len() as u64 > declared {
				error!("the body size exceeds the declared Content-Length");
				return Err(ApiError::BadSequenceOfCalls(
					"the body size exceeds the declared Content-Length",
				));
			}
		}

		if !data.is_empty() {
			self.stream.send(false, data)?;
			self.position += data.len() as u64;
		}

		if self.declared_length.is_none() || Some(self.position) == self.declared_length {
			self.state = State::Done;
		}

		Ok(())
	}

	pub fn send_method_not_allowed(&mut self, allowed: &str) -> Result<(), ApiError> {
		self.clear_headers()?;
		self.set_status(405)?;
		self.add_header("Allow", allowed)?;
		self.send_body(&[])
	}

	/// Answers with an empty body and the given status. The codes that have
	/// dedicated helpers are refused.
	pub fn send_status(&mut self, status: u16) -> Result<(), ApiError> {
		if matches!(status, 200 | 301 | 401 | 405) {
			return Err(ApiError::ParameterOutOfRange(format!(
				"use the dedicated method for HTTP status {status}"
			)));
		}

		self.clear_headers()?;
		self.set_status(status)?;
		self.send_body(&[])
	}

	pub fn redirect(&mut self, path: &str) -> Result<(), ApiError> {
		self.clear_headers()?;
		self.set_status(301)?;
		self.add_header("Location", path)?;
		self.send_body(&[])
	}

	pub fn send_unauthorized(&mut self, realm: &str) -> Result<(), ApiError> {
		self.clear_headers()?;
		self.set_status(401)?;
		self.add_header("WWW-Authenticate", &format!("Basic realm=\"{realm}\""))?;
		self.send_body(&[])
	}
}

impl<S: HttpOutputStream> Drop for HttpOutput<S> {
	fn drop(&mut self) {
		// Anomalies at finalisation are logged, never raised: raising here
		// would tear down a connection that is already beyond repair.
		if self.state != State::Done {
			error!("this HTTP answer does not contain any body");
		}
		if let Some(declared) = self.declared_length {
			if self.position != declared {
				error!("this HTTP answer has not sent the declared number of body bytes");
			}
		}
	}
}

const fn reason(status: u16) -> &'static str {
	match status {
		200 => "OK",
		301 => "Moved Permanently",
		400 => "Bad Request",
		401 => "Unauthorized",
		403 => "Forbidden",
		404 => "Not Found",
		405 => "Method Not Allowed",
		415 => "Unsupported Media Type",
		500 => "Internal Server Error",
		501 => "Not Implemented",
		_ => "Unknown",
	}
}

/// In-memory [`HttpOutputStream`] capturing the exact wire bytes. Used by
/// the REST handlers to encode through the state machine and hand the
/// result over to the embedded HTTP server.
#[derive(Debug, Default)]
pub struct BufferedStream {
	status: u16,
	header_block: Vec<u8>,
	body: Vec<u8>,
}

impl HttpOutputStream for BufferedStream {
	fn on_status(&mut self, status: u16) {
		self.status = status;
	}

	fn send(&mut self, is_header: bool, data: &[u8]) -> Result<(), ApiError> {
		if is_header {
			self.header_block.extend_from_slice(data);
		} else {
			self.body.extend_from_slice(data);
		}
		Ok(())
	}
}

impl BufferedStream {
	pub fn status(&self) -> u16 {
		self.status
	}

	/// The raw response bytes, exactly as they would go on the wire.
	pub fn wire(&self) -> Vec<u8> {
		let mut wire = self.header_block.clone();
		wire.extend_from_slice(&self.body);
		wire
	}

	/// Re-expresses the captured response for the embedded HTTP server.
	/// `Content-Length` and `Connection` are dropped: the server owns the
	/// actual connection and recomputes both.
	pub fn into_response(self) -> Response {
		let mut builder = Response::builder().status(
			StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
		);

		let header_text = String::from_utf8_lossy(&self.header_block).into_owned();
		for line in header_text.split("\r\n").skip(1) {
			let Some((name, value)) = line.split_once(": ") else {
				continue;
			};
			if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection")
			{
				continue;
			}
			if let (Ok(name), Ok(value)) = (
				HeaderName::try_from(name),
				HeaderValue::try_from(value),
			) {
				builder = builder.header(name, value);
			}
		}

		builder
			.body(Body::from(self.body))
			.expect("response built from captured parts")
	}
}

impl<S: HttpOutputStream + Default> HttpOutput<S> {
	/// Finalises the response and recovers the stream. The state machine's
	/// drop-time checks still apply.
	pub fn finish(mut self) -> S {
		std::mem::take(&mut self.stream)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn output() -> HttpOutput<BufferedStream> {
		HttpOutput::new(BufferedStream::default(), false)
	}

	#[test]
	fn single_shot_body_encodes_status_headers_and_length() {
		let mut output = output();
		output.set_content_type("application/json").unwrap();
		output.send_body(b"{}").unwrap();
		assert!(output.is_done());

		let wire = output.finish().wire();
		let text = String::from_utf8(wire).unwrap();
		assert_eq!(
			text,
			"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}"
		);
	}

	#[test]
	fn keep_alive_adds_connection_header() {
		let mut output = HttpOutput::new(BufferedStream::default(), true);
		output.send_body(b"x").unwrap();

		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.contains("Connection: keep-alive\r\n"));
	}

	#[test]
	fn headers_are_frozen_once_the_body_starts() {
		let mut output = output();
		output.set_content_length(4).unwrap();
		output.send_body(b"ab").unwrap();

		assert!(matches!(
			output.add_header("X-Late", "1"),
			Err(ApiError::BadSequenceOfCalls(_))
		));
		assert!(matches!(
			output.set_status(404),
			Err(ApiError::BadSequenceOfCalls(_))
		));
		assert!(matches!(
			output.clear_headers(),
			Err(ApiError::BadSequenceOfCalls(_))
		));

		// Draining the declared length still succeeds afterwards.
		output.send_body(b"cd").unwrap();
		assert!(output.is_done());
	}

	#[test]
	fn declared_length_spreads_over_chunks() {
		let mut output = output();
		output.set_content_length(10).unwrap();
		output.send_body(b"01234").unwrap();
		assert!(!output.is_done());
		output.send_body(b"56789").unwrap();
		assert!(output.is_done());

		let stream = output.finish();
		let text = String::from_utf8(stream.wire()).unwrap();
		assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
		assert!(text.contains("Content-Length: 10\r\n"));
		assert!(text.ends_with("\r\n\r\n0123456789"));
	}

	#[test]
	fn exceeding_the_declared_length_fails() {
		let mut output = output();
		output.set_content_length(10).unwrap();
		assert!(matches!(
			output.send_body(b"0123456789ab"),
			Err(ApiError::BadSequenceOfCalls(_))
		));
	}

	#[test]
	fn second_body_after_done_fails_unless_empty() {
		let mut output = output();
		output.send_body(b"complete").unwrap();
		assert!(output.is_done());

		assert!(output.send_body(&[]).is_ok());
		assert!(matches!(
			output.send_body(b"more"),
			Err(ApiError::BadSequenceOfCalls(_))
		));
	}

	#[test]
	fn non_ok_status_discards_the_declared_length() {
		let mut output = output();
		output.set_status(404).unwrap();
		output.set_content_length(1000).unwrap();
		output.send_body(b"missing").unwrap();
		assert!(output.is_done());

		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
		assert!(text.contains("Content-Length: 7\r\n"));
	}

	#[test]
	fn method_not_allowed_clears_headers_and_sets_allow() {
		let mut output = output();
		output.add_header("X-Stale", "1").unwrap();
		output.send_method_not_allowed("GET,POST").unwrap();

		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
		assert!(text.contains("Allow: GET,POST\r\n"));
		assert!(!text.contains("X-Stale"));
		assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
	}

	#[test]
	fn send_status_rejects_codes_with_dedicated_helpers() {
		for status in [200, 301, 401, 405] {
			let mut output = output();
			assert!(matches!(
				output.send_status(status),
				Err(ApiError::ParameterOutOfRange(_))
			));
			// Keep the drop-time checks quiet.
			output.send_body(&[]).unwrap();
		}

		let mut output = output();
		output.send_status(403).unwrap();
		assert!(output.is_done());
	}

	#[test]
	fn redirect_and_unauthorized_set_their_headers() {
		let mut output = output();
		output.redirect("/app/index.html").unwrap();
		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
		assert!(text.contains("Location: /app/index.html\r\n"));

		let mut output = HttpOutput::new(BufferedStream::default(), false);
		output.send_unauthorized("reliquary").unwrap();
		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
		assert!(text.contains("WWW-Authenticate: Basic realm=\"reliquary\"\r\n"));
	}

	#[test]
	fn cookies_are_plain_headers() {
		let mut output = output();
		output.set_cookie("sid", "abc123").unwrap();
		output.send_body(b"ok").unwrap();

		let text = String::from_utf8(output.finish().wire()).unwrap();
		assert!(text.contains("Set-Cookie: sid=abc123\r\n"));

		let mut output = HttpOutput::new(BufferedStream::default(), false);
		output.send_body(b"done").unwrap();
		assert!(matches!(
			output.set_cookie("sid", "late"),
			Err(ApiError::BadSequenceOfCalls(_))
		));
	}

	#[test]
	fn captured_response_drops_framing_headers() {
		let mut output = HttpOutput::new(BufferedStream::default(), true);
		output.set_content_type("application/dicom").unwrap();
		output.send_body(b"DICM").unwrap();

		let response = output.finish().into_response();
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(
			response.headers().get("content-type").unwrap(),
			"application/dicom"
		);
		assert!(response.headers().get("connection").is_none());
	}
}
