//! Wire messages (`murmur.v1`).
//!
//! Every frame carries a `ClientEnvelope` (client to server) or a
//! `ServerEnvelope` (server to client); the oneof is the discriminant.
#![forbid(unsafe_code)]

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Recipient {
	#[prost(oneof = "recipient::Target", tags = "1, 2")]
	pub target: ::core::option::Option<recipient::Target>,
}

pub mod recipient {
	#[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
	pub enum Target {
		#[prost(int64, tag = "1")]
		User(i64),
		#[prost(int64, tag = "2")]
		Group(i64),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, tag = "2")]
	pub name: ::prost::alloc::string::String,
	#[prost(bool, tag = "3")]
	pub online: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Group {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, tag = "2")]
	pub name: ::prost::alloc::string::String,
	#[prost(int64, repeated, tag = "3")]
	pub members: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(int64, tag = "2")]
	pub sender: i64,
	#[prost(message, optional, tag = "3")]
	pub recipient: ::core::option::Option<Recipient>,
	#[prost(string, tag = "4")]
	pub body: ::prost::alloc::string::String,
	#[prost(int64, tag = "5")]
	pub created_at: i64,
	#[prost(string, repeated, tag = "6")]
	pub tags: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

// ---- requests ----

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClaimIdentity {
	#[prost(string, tag = "1")]
	pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchConversation {
	#[prost(message, optional, tag = "1")]
	pub recipient: ::core::option::Option<Recipient>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessage {
	#[prost(string, tag = "1")]
	pub body: ::prost::alloc::string::String,
	#[prost(message, optional, tag = "2")]
	pub recipient: ::core::option::Option<Recipient>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditMessage {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, tag = "2")]
	pub body: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditTags {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, repeated, tag = "2")]
	pub tags: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMessage {
	#[prost(int64, tag = "1")]
	pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateGroup {
	#[prost(string, tag = "1")]
	pub name: ::prost::alloc::string::String,
	#[prost(int64, repeated, tag = "2")]
	pub members: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditGroup {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, tag = "2")]
	pub name: ::prost::alloc::string::String,
	#[prost(int64, repeated, tag = "3")]
	pub members: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteGroup {
	#[prost(int64, tag = "1")]
	pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientEnvelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,
	#[prost(oneof = "client_envelope::Request", tags = "10, 11, 12, 13, 14, 15, 16, 17, 18")]
	pub request: ::core::option::Option<client_envelope::Request>,
}

pub mod client_envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Request {
		#[prost(message, tag = "10")]
		ClaimIdentity(super::ClaimIdentity),
		#[prost(message, tag = "11")]
		FetchConversation(super::FetchConversation),
		#[prost(message, tag = "12")]
		SendMessage(super::SendMessage),
		#[prost(message, tag = "13")]
		EditMessage(super::EditMessage),
		#[prost(message, tag = "14")]
		EditTags(super::EditTags),
		#[prost(message, tag = "15")]
		DeleteMessage(super::DeleteMessage),
		#[prost(message, tag = "16")]
		CreateGroup(super::CreateGroup),
		#[prost(message, tag = "17")]
		EditGroup(super::EditGroup),
		#[prost(message, tag = "18")]
		DeleteGroup(super::DeleteGroup),
	}
}

// ---- events ----

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	/// Stable machine-readable code (`VALIDATION`, `CONFLICT`, ...).
	#[prost(string, tag = "1")]
	pub code: ::prost::alloc::string::String,
	#[prost(string, tag = "2")]
	pub message: ::prost::alloc::string::String,
	/// Label of the request that failed; empty when the error is not tied to one.
	#[prost(string, tag = "3")]
	pub request: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(int64, tag = "1")]
	pub user_id: i64,
	#[prost(message, repeated, tag = "2")]
	pub users: ::prost::alloc::vec::Vec<User>,
	#[prost(message, repeated, tag = "3")]
	pub groups: ::prost::alloc::vec::Vec<Group>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserAdded {
	#[prost(message, optional, tag = "1")]
	pub user: ::core::option::Option<User>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserPresence {
	#[prost(int64, tag = "1")]
	pub user_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Conversation {
	#[prost(message, optional, tag = "1")]
	pub recipient: ::core::option::Option<Recipient>,
	#[prost(message, repeated, tag = "2")]
	pub messages: ::prost::alloc::vec::Vec<Message>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageSent {
	#[prost(message, optional, tag = "1")]
	pub message: ::core::option::Option<Message>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageTagsEdited {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, repeated, tag = "2")]
	pub tags: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageEdited {
	#[prost(int64, tag = "1")]
	pub id: i64,
	#[prost(string, tag = "2")]
	pub body: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageDeleted {
	#[prost(int64, tag = "1")]
	pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupChanged {
	#[prost(message, optional, tag = "1")]
	pub group: ::core::option::Option<Group>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupDeleted {
	#[prost(int64, tag = "1")]
	pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerEnvelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,
	#[prost(oneof = "server_envelope::Event", tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22")]
	pub event: ::core::option::Option<server_envelope::Event>,
}

pub mod server_envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Event {
		#[prost(message, tag = "10")]
		Error(super::Error),
		#[prost(message, tag = "11")]
		Welcome(super::Welcome),
		#[prost(message, tag = "12")]
		UserAdded(super::UserAdded),
		#[prost(message, tag = "13")]
		UserOnline(super::UserPresence),
		#[prost(message, tag = "14")]
		UserOffline(super::UserPresence),
		#[prost(message, tag = "15")]
		Conversation(super::Conversation),
		#[prost(message, tag = "16")]
		MessageSent(super::MessageSent),
		#[prost(message, tag = "17")]
		MessageTagsEdited(super::MessageTagsEdited),
		#[prost(message, tag = "18")]
		MessageEdited(super::MessageEdited),
		#[prost(message, tag = "19")]
		MessageDeleted(super::MessageDeleted),
		#[prost(message, tag = "20")]
		GroupAdded(super::GroupChanged),
		#[prost(message, tag = "21")]
		GroupEdited(super::GroupChanged),
		#[prost(message, tag = "22")]
		GroupDeleted(super::GroupDeleted),
	}
}
