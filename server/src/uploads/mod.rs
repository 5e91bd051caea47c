//! Attachment storage.
//!
//! Raw attachment bytes are written once under a generated name; only that
//! name is persisted with the message and relayed to clients. Files are
//! served read-only at `/uploads/{name}`.

pub mod store;
