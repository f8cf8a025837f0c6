//! The canonical conversation model shared by every vendor adapter.
//!
//! Callers build requests out of these types and always get responses back in them.
//! Each adapter converts to and from its vendor's wire shapes at the boundary, so
//! none of these structs is an exact match for any one vendor's format.
pub mod content;
pub mod message;
pub mod request;
pub mod response;
pub mod role;
pub mod schema;
pub mod tool;
pub mod value;
