//! Hand-off point for protocol upgrades (e.g. WebSocket).
//!
//! The benchmark server does not speak any upgraded protocol: the session
//! gives up the connection here and this stub closes it.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::message::Request;

pub fn hand_off<S>(stream: S, request: Request)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    debug!(
        protocol = request.header("upgrade").unwrap_or_default(),
        target = %request.target,
        "Upgrade requested, no handler registered; dropping connection"
    );
    drop(stream);
}
