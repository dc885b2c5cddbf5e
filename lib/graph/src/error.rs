use ids::DistributedId;

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("unknown id {0}")]
    UnknownId(DistributedId),
    #[error("switch_layer called on a non-local edge {0}")]
    InvalidLayerSwitch(DistributedId),
    #[error("codec failed to (de)serialize a payload")]
    CodecFailure,
    #[error("requested mobility beyond the agent's current range")]
    OutOfMobility,
    #[error("communication with a peer rank failed")]
    CommunicationFailure,
}

pub type Result<T, E = ErrorKind> = error_stack::Result<T, E>;
