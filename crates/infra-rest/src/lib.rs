// vdcmig Infrastructure - REST Adapter
// Implements: RemoteCall

mod client;

pub use client::{RestConfig, RestRemoteCall};
