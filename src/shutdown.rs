//! Cancellation signal shared by the readers and the flush loop

use tokio::sync::watch;

/// Resolves once `true` has been published on the shutdown channel.
///
/// A dropped sender can never request shutdown, so in that case the future
/// stays pending instead of resolving.
pub(crate) async fn requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub(crate) fn is_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
