use thiserror::Error;

use crate::external::ExternalError;
use crate::graph::GraphError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Build cancelled")]
    Cancelled,
}
