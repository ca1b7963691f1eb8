//! # Lattice Core Event System Errors
use thiserror::Error;

use crate::event::ListenerToken;
use crate::kernel::guard::SharedError;

#[derive(Debug, Error, Clone)]
pub enum ListenerError {
    #[error("{kind} listener {token} failed while handling '{event}'")]
    CallbackFailed {
        kind: &'static str,
        token: ListenerToken,
        event: &'static str,
        #[source]
        source: SharedError,
    },

    #[error("Listener {0} is not registered")]
    UnknownToken(ListenerToken),
}
