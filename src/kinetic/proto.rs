//! Protobuf messages exchanged with Kinetic drives
//!
//! The structs are written by hand with prost derives (no protoc involved in
//! the build) and cover the subset of the drive protocol this crate speaks:
//! key/value operations, key-range listing and the statistics log.

/// Outermost envelope of a frame's message part
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
	#[prost(enumeration = "AuthType", optional, tag = "1")]
	pub auth_type: Option<i32>,
	#[prost(message, optional, tag = "2")]
	pub hmac_auth: Option<HmacAuth>,
	/// A serialized [`Command`]; kept as raw bytes because the HMAC covers
	/// this exact byte string
	#[prost(bytes = "vec", optional, tag = "4")]
	pub command_bytes: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HmacAuth {
	#[prost(int64, optional, tag = "1")]
	pub identity: Option<i64>,
	#[prost(bytes = "vec", optional, tag = "2")]
	pub hmac: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
	#[prost(message, optional, tag = "1")]
	pub header: Option<Header>,
	#[prost(message, optional, tag = "2")]
	pub body: Option<Body>,
	#[prost(message, optional, tag = "3")]
	pub status: Option<Status>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
	#[prost(int64, optional, tag = "1")]
	pub cluster_version: Option<i64>,
	#[prost(int64, optional, tag = "3")]
	pub connection_id: Option<i64>,
	#[prost(uint64, optional, tag = "4")]
	pub sequence: Option<u64>,
	#[prost(uint64, optional, tag = "6")]
	pub ack_sequence: Option<u64>,
	#[prost(enumeration = "MessageType", optional, tag = "7")]
	pub message_type: Option<i32>,
	/// Milliseconds the drive may spend on the request
	#[prost(uint64, optional, tag = "9")]
	pub timeout: Option<u64>,
	#[prost(enumeration = "Priority", optional, tag = "12")]
	pub priority: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Body {
	#[prost(message, optional, tag = "1")]
	pub key_value: Option<KeyValue>,
	#[prost(message, optional, tag = "2")]
	pub range: Option<Range>,
	#[prost(message, optional, tag = "6")]
	pub get_log: Option<GetLog>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
	#[prost(bytes = "vec", optional, tag = "2")]
	pub new_version: Option<Vec<u8>>,
	#[prost(bytes = "vec", optional, tag = "3")]
	pub key: Option<Vec<u8>>,
	#[prost(bytes = "vec", optional, tag = "4")]
	pub db_version: Option<Vec<u8>>,
	#[prost(bytes = "vec", optional, tag = "5")]
	pub tag: Option<Vec<u8>>,
	#[prost(enumeration = "Algorithm", optional, tag = "6")]
	pub algorithm: Option<i32>,
	#[prost(bool, optional, tag = "7")]
	pub metadata_only: Option<bool>,
	#[prost(bool, optional, tag = "8")]
	pub force: Option<bool>,
	#[prost(enumeration = "Synchronization", optional, tag = "9")]
	pub synchronization: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Range {
	#[prost(bytes = "vec", optional, tag = "1")]
	pub start_key: Option<Vec<u8>>,
	#[prost(bytes = "vec", optional, tag = "2")]
	pub end_key: Option<Vec<u8>>,
	#[prost(bool, optional, tag = "3")]
	pub start_key_inclusive: Option<bool>,
	#[prost(bool, optional, tag = "4")]
	pub end_key_inclusive: Option<bool>,
	#[prost(int32, optional, tag = "5")]
	pub max_returned: Option<i32>,
	#[prost(bool, optional, tag = "6")]
	pub reverse: Option<bool>,
	#[prost(bytes = "vec", repeated, tag = "8")]
	pub keys: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetLog {
	#[prost(enumeration = "GetLogType", repeated, tag = "1")]
	pub types: Vec<i32>,
	#[prost(message, repeated, tag = "2")]
	pub utilizations: Vec<Utilization>,
	#[prost(message, repeated, tag = "3")]
	pub temperatures: Vec<Temperature>,
	#[prost(message, optional, tag = "4")]
	pub capacity: Option<Capacity>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Utilization {
	#[prost(string, optional, tag = "1")]
	pub name: Option<String>,
	#[prost(float, optional, tag = "2")]
	pub value: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Temperature {
	#[prost(string, optional, tag = "1")]
	pub name: Option<String>,
	#[prost(float, optional, tag = "2")]
	pub current: Option<f32>,
	#[prost(float, optional, tag = "3")]
	pub minimum: Option<f32>,
	#[prost(float, optional, tag = "4")]
	pub maximum: Option<f32>,
	#[prost(float, optional, tag = "5")]
	pub target: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Capacity {
	#[prost(uint64, optional, tag = "1")]
	pub nominal_capacity_in_bytes: Option<u64>,
	#[prost(float, optional, tag = "4")]
	pub portion_full: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
	#[prost(enumeration = "StatusCode", optional, tag = "1")]
	pub code: Option<i32>,
	#[prost(string, optional, tag = "2")]
	pub status_message: Option<String>,
	#[prost(bytes = "vec", optional, tag = "3")]
	pub detailed_message: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AuthType {
	InvalidAuthType = -1,
	HmacAuth = 1,
	PinAuth = 2,
	UnsolicitedStatus = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
	InvalidMessageType = -1,
	GetResponse = 1,
	Get = 2,
	PutResponse = 3,
	Put = 4,
	DeleteResponse = 5,
	Delete = 6,
	GetNextResponse = 7,
	GetNext = 8,
	GetKeyRangeResponse = 9,
	GetKeyRange = 10,
	GetLogResponse = 23,
	GetLog = 24,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
	InvalidStatusCode = -1,
	NotAttempted = 0,
	Success = 1,
	HmacFailure = 2,
	NotAuthorized = 3,
	VersionFailure = 4,
	InternalError = 5,
	HeaderRequired = 6,
	NotFound = 7,
	VersionMismatch = 8,
	ServiceBusy = 9,
	Expired = 10,
	DataError = 11,
	PermDataError = 12,
	RemoteConnectionError = 13,
	NoSpace = 14,
	NoSuchHmacAlgorithm = 15,
	InvalidRequest = 16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Priority {
	Lowest = 1,
	Lower = 3,
	Normal = 5,
	Higher = 7,
	Highest = 9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Algorithm {
	InvalidAlgorithm = -1,
	Sha1 = 1,
	Sha2 = 2,
	Sha3 = 3,
	Crc32 = 4,
	Crc64 = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Synchronization {
	InvalidSynchronization = -1,
	WriteThrough = 1,
	WriteBack = 2,
	Flush = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum GetLogType {
	InvalidGetLogType = -1,
	Utilizations = 0,
	Temperatures = 1,
	Capacities = 2,
}
