use broker::BrokerConnection;
use common::format_error;

use crate::Result;

/// Closes the broker channel, then the connection.
///
/// Both closes are attempted even if the first fails; each outcome is logged
/// and the first failure is returned.
#[tracing::instrument(skip_all)]
pub async fn shutdown(connection: &BrokerConnection) -> Result<()> {
    let channel = connection
        .channel
        .close()
        .await
        .inspect(|_| tracing::info!("broker channel closed"))
        .inspect_err(|e| tracing::error!(error = %format_error(e), "failed to close broker channel"));

    let conn = connection
        .connection
        .close()
        .await
        .inspect(|_| tracing::info!("broker connection closed"))
        .inspect_err(|e| {
            tracing::error!(error = %format_error(e), "failed to close broker connection")
        });

    channel.and(conn)?;
    Ok(())
}
