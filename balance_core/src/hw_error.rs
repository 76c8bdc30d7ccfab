//! Maps `Box<dyn Error>` from the transport boundary to typed `BalanceError`.
//!
//! Every transport failure is a connection fault from the bridge's point of view;
//! the mapping only decides how precisely the cause is described.

use crate::error::BalanceError;

/// Map a trait-boundary error to `BalanceError::Connection`.
///
/// Attempts to downcast known hardware error types first, then falls back to the
/// error's own message.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> BalanceError {
    #[cfg(feature = "hardware-errors")]
    {
        use balance_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Closed => BalanceError::Connection("peer closed the connection".into()),
                HwError::LineTooLong(_) | HwError::Encoding => {
                    BalanceError::Connection(format!("framing lost: {hw}"))
                }
                other => BalanceError::Connection(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return BalanceError::Connection(format!("io: {io}"));
    }
    BalanceError::Connection(e.to_string())
}
