pub const SEND_EXPECT_MESSAGE: &str = "Channel closed unexpectedly while sending";
pub const RECV_EXPECT_MESSAGE: &str = "Channel closed unexpectedly while receiving";

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("could not construct communicator")]
    Setup,
    #[error("could not send message")]
    Send,
    #[error("could not receive message")]
    Receive,
    #[error("could not serialize payload")]
    Serialize,
    #[error("could not deserialize payload")]
    Deserialize,
    #[error("peer rank {0} is not reachable")]
    UnknownPeer(u32),
}

pub type Result<T, E = ErrorKind> = error_stack::Result<T, E>;
