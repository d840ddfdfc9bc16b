//! One handler module per scheduler event (spec §4.3).

pub mod batch_init;
pub mod member_added;
pub mod member_removed;
pub mod phase_due;
pub mod poll_check;
pub mod retry_check;

pub use batch_init::handle_batch_init;
pub use member_added::handle_member_added;
pub use member_removed::handle_member_removed;
pub use phase_due::handle_phase_due;
pub use poll_check::handle_poll_check;
pub use retry_check::handle_retry_check;
