//! IPC module for daemon-UI communication

mod protocol;
mod server;

pub use protocol::{
    read_frame, write_frame, DaemonStatus, FrameError, Notification, Outgoing, Request, Response,
    MAX_FRAME_LEN,
};
pub use server::Server;
