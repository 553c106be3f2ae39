pub mod frames;

pub use frames::{now_rfc3339, AuthPayload, ClientFrame, ServerFrame};
