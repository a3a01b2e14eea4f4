// Transparent re-authentication for remote calls

use crate::error::Result;
use crate::port::{RemoteCall, RemoteError, RemoteRequest, RemoteResponse};
use tracing::warn;

/// Invoke `request`, renewing the session and retrying exactly once if the
/// platform reports it expired. Every other error propagates untouched.
pub async fn invoke_with_reauth(
    remote: &dyn RemoteCall,
    request: &RemoteRequest,
) -> Result<RemoteResponse> {
    match remote.invoke(request).await {
        Err(RemoteError::SessionExpired) => {
            warn!(
                method = %request.method,
                path = %request.path,
                "Session expired, re-authenticating and retrying once"
            );
            remote.reauthenticate().await?;
            Ok(remote.invoke(request).await?)
        }
        other => Ok(other?),
    }
}
