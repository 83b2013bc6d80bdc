//! Store readiness check

use blksync_core::{BlksyncError, BlksyncResult};
use opendal::Operator;

/// Verify the store root is reachable.
///
/// Reads at most one directory entry, so the cost does not grow with the
/// number of stored blocks.
pub async fn check_health(op: &Operator) -> BlksyncResult<()> {
    op.check()
        .await
        .map_err(|e| BlksyncError::Storage(format!("block store unreachable: {e}")))
}
